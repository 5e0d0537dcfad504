use std::path::PathBuf;

use report_mailer::EXIT_STARTUP_FAILED;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let context_arg = std::env::args_os().nth(1).map(PathBuf::from);
    let code = match report_mailer::run(context_arg).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            EXIT_STARTUP_FAILED
        }
    };
    std::process::exit(code);
}
