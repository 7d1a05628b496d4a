//! Runs one script headlessly for a fixed number of frames and reports what it drew.
//!
//! `script_harness --script game.rhai --frames 120` prints a short summary; `--json` prints the
//! full per-frame output instead. Fixtures (`--fixture`) add scheduled input and pixel samples,
//! and `--golden` compares the output against a stored run. The exit code is non-zero when the
//! script failed, a tick raised, or the golden did not match.

use std::env;
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use lark_engine::app::init_tracing;
use lark_engine::script_harness::{load_fixture, run_fixture, HarnessFixture, HarnessOutput};

fn main() -> ExitCode {
    init_tracing();
    match run_cli() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("[script-harness] error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` when the run itself completed but the script misbehaved.
fn run_cli() -> Result<bool> {
    let opts = HarnessArgs::parse(env::args().skip(1))?;
    let Some(fixture) = opts.fixture()? else {
        print_usage();
        return Ok(true);
    };
    let output = run_fixture(&fixture)?;

    if let Some(path) = &opts.write_output {
        let file = File::create(path).with_context(|| format!("creating '{}'", path.display()))?;
        serde_json::to_writer_pretty(file, &output).context("serializing harness output")?;
        eprintln!("[script-harness] wrote {}", path.display());
    }
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&fixture, &output);
    }

    let mut ok = output.failures().is_empty();
    for failure in output.failures() {
        eprintln!("[script-harness] {failure}");
    }
    if let Some(path) = &opts.golden {
        let file = File::open(path).with_context(|| format!("opening golden '{}'", path.display()))?;
        let expected: HarnessOutput = serde_json::from_reader(file).context("parsing golden JSON")?;
        if expected != output {
            eprintln!("[script-harness] output differs from {} (refresh with --write-output)", path.display());
            ok = false;
        }
    }
    Ok(ok)
}

fn print_summary(fixture: &HarnessFixture, output: &HarnessOutput) {
    let commands: usize = output.records.iter().map(|record| record.commands.len()).sum();
    println!("script        {}", fixture.script);
    println!("exit          {} after {} frame(s), script ran {}", output.exit, output.frames, output.frames_run);
    println!("final state   {}", output.final_state);
    println!("commands      {commands}");
    println!(
        "surface       {}x{}, {} painted pixel(s)",
        output.surface.width, output.surface.height, output.surface.painted_pixels
    );
    for sample in &output.surface.samples {
        println!("  ({}, {})  rgba{:?}", sample.x, sample.y, sample.rgba);
    }
    if !output.audio_triggers.is_empty() {
        println!("audio         {}", output.audio_triggers.join(", "));
    }
}

#[derive(Debug, Default, PartialEq)]
struct HarnessArgs {
    script: Option<PathBuf>,
    fixture: Option<PathBuf>,
    frames: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    golden: Option<PathBuf>,
    write_output: Option<PathBuf>,
    json: bool,
}

impl HarnessArgs {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut opts = Self::default();
        let mut iter = args.into_iter();
        while let Some(flag) = iter.next() {
            if flag == "--json" {
                opts.json = true;
                continue;
            }
            if flag == "--help" || flag == "-h" {
                return Ok(Self::default());
            }
            let value = iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?;
            match flag.as_str() {
                "--script" | "-s" => opts.script = Some(PathBuf::from(value)),
                "--fixture" | "-f" => opts.fixture = Some(PathBuf::from(value)),
                "--frames" | "-n" => {
                    opts.frames = Some(value.parse().with_context(|| format!("Invalid frame count '{value}'"))?);
                }
                "--width" => opts.width = Some(value.parse().with_context(|| format!("Invalid width '{value}'"))?),
                "--height" => opts.height = Some(value.parse().with_context(|| format!("Invalid height '{value}'"))?),
                "--golden" | "-g" => opts.golden = Some(PathBuf::from(value)),
                "--write-output" | "-o" => opts.write_output = Some(PathBuf::from(value)),
                _ => bail!("Unknown flag '{flag}'"),
            }
        }
        if opts.script.is_some() && opts.fixture.is_some() {
            bail!("--script and --fixture are mutually exclusive");
        }
        Ok(opts)
    }

    /// Fixture to run, with command-line sizes and frame counts taking precedence.
    fn fixture(&self) -> Result<Option<HarnessFixture>> {
        let mut fixture = match (&self.script, &self.fixture) {
            (Some(script), None) => HarnessFixture::for_script(script),
            (None, Some(path)) => load_fixture(path)?,
            _ => return Ok(None),
        };
        if let Some(frames) = self.frames {
            fixture.frames = frames;
        }
        if let Some(width) = self.width {
            fixture.width = width;
        }
        if let Some(height) = self.height {
            fixture.height = height;
        }
        Ok(Some(fixture))
    }
}

fn print_usage() {
    println!("Usage: script_harness (--script <file.rhai> | --fixture <file.json>) [options]");
    println!("  -n, --frames <N>          frames to run (fixture default: 10)");
    println!("      --width/--height <px> surface size");
    println!("      --json                print the full output instead of a summary");
    println!("  -g, --golden <file>       fail unless the output matches");
    println!("  -o, --write-output <file> store the output, e.g. to refresh a golden");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn script_runs_take_size_and_frames_from_flags() {
        let opts = HarnessArgs::parse(args(&["--script", "game.rhai", "-n", "3", "--width", "32", "--json"]))
            .expect("parse");
        assert!(opts.json);
        let fixture = opts.fixture().expect("fixture").expect("script given");
        assert_eq!(fixture.script, "game.rhai");
        assert_eq!((fixture.frames, fixture.width, fixture.height), (3, 32, 64));
    }

    #[test]
    fn bad_flags_are_rejected() {
        assert!(HarnessArgs::parse(args(&["--frames", "many"])).is_err());
        assert!(HarnessArgs::parse(args(&["--script", "a.rhai", "--fixture", "b.json"])).is_err());
        assert!(HarnessArgs::parse(args(&["--script"])).is_err());
        let empty = HarnessArgs::parse(args(&["--help"])).expect("help");
        assert!(empty.fixture().expect("no fixture").is_none());
    }
}
