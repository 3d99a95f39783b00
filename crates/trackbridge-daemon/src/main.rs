use trackbridge_daemon_lib::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_path) = AppConfig::load()?;
    trackbridge_daemon_lib::run(config, config_path).await
}
