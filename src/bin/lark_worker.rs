//! Script side of isolated mode. Speaks length-prefixed frames on stdin/stdout; logs go to stderr.

use std::io::{self, BufReader, BufWriter};

use anyhow::{anyhow, Result};
use lark_engine::app::{canvas_size, init_tracing, resolve_config};
use lark_engine::assets::AssetLoader;
use lark_engine::channel::wire::StreamTransport;
use lark_engine::channel::MessageChannel;
use lark_engine::cli::CliOptions;
use lark_engine::scripts::ScriptRuntime;

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("[lark-worker] error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse_from_env()?;
    let script = options.script.clone().ok_or_else(|| anyhow!("--script argument missing"))?;
    let config = resolve_config(&options);

    let transport = StreamTransport::new(BufReader::new(io::stdin()), BufWriter::new(io::stdout()));
    let channel = MessageChannel::new(transport, canvas_size(&config));
    let loader = AssetLoader::for_script(&script, config.assets.validation);
    let mut runtime = ScriptRuntime::new(Box::new(channel), loader, &config.script);
    let result = runtime.run_file(&script);
    runtime.dispose();
    result
}
