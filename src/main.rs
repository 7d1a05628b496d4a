use lark_engine::app::{init_tracing, resolve_config, run};
use lark_engine::cli::CliOptions;

fn main() {
    init_tracing();
    let options = match CliOptions::parse_from_env() {
        Ok(options) => options,
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    let config = resolve_config(&options);
    match run(&config, &options) {
        Ok(outcome) if outcome.script_error.is_some() => std::process::exit(1),
        Ok(_) => {}
        Err(err) => {
            eprintln!("Application error: {err:?}");
            std::process::exit(1);
        }
    }
}
