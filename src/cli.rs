use crate::config::EngineConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOptions {
    pub script: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub frames: Option<u64>,
    pub capture: Option<PathBuf>,
    pub isolated: bool,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

impl CliOptions {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = CliOptions::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if !flag.starts_with("--") {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            }
            let key = &flag[2..];
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "script" => options.script = Some(PathBuf::from(value)),
                "config" => options.config = Some(PathBuf::from(value)),
                "capture" => options.capture = Some(PathBuf::from(value)),
                "frames" => {
                    options.frames =
                        Some(value.parse::<u64>().with_context(|| format!("Invalid frame count '{value}'"))?);
                }
                "width" => {
                    options.width =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid width '{value}'"))?);
                }
                "height" => {
                    options.height =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid height '{value}'"))?);
                }
                "fps" => {
                    options.fps = Some(value.parse::<u32>().with_context(|| format!("Invalid fps '{value}'"))?);
                }
                "isolated" => {
                    options.isolated = parse_bool_flag("isolated", &value)?;
                }
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --script, --config, --frames, --capture, \
                     --width, --height, --fps, --isolated."
                ),
            }
        }
        Ok(options)
    }

    pub fn config_overrides(&self) -> EngineConfigOverrides {
        EngineConfigOverrides { width: self.width, height: self.height, target_fps: self.fps }
    }

    #[cfg(test)]
    pub fn size_tuple(&self) -> (Option<u32>, Option<u32>, Option<u32>) {
        (self.width, self.height, self.fps)
    }
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}
