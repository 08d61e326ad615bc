use asset_lifecycle::cli::CliOptions;
use asset_lifecycle::debugger::run;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let options = match CliOptions::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            log::error!("[cli] {err}");
            std::process::exit(2);
        }
    };
    match run(&options) {
        Ok(report) => log::info!(
            "[assets] {}/{} spawned, {} despawned; store {:?}; pool {:?}; activation {:?}",
            report.spawned,
            report.requested,
            report.despawned,
            report.store,
            report.pool,
            report.activation
        ),
        Err(err) => {
            log::error!("Debugger error: {err:?}");
            std::process::exit(1);
        }
    }
}
