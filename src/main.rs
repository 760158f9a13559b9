use lucky_dns::{
    dns::{alidns::AlidnsProvider, dnspod::DnspodProvider, esa::EsaProvider, DnsProvider},
    provision::Provisioner,
    rate_limit::RateLimit,
    scheduler::Scheduler,
    settings::{ConfigStore, FileConfigStore},
    source::lucky::LuckySource,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

build_info::build_info!(fn build_info);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing()?;

    let info = build_info();
    info!(
        version = %info.crate_info.version,
        profile = %info.profile,
        "starting {}",
        info.crate_info.name
    );

    let store = FileConfigStore::from_env()?;
    info!(path = %store.path().display(), "using config file");
    let store: Arc<dyn ConfigStore> = Arc::new(store);

    run(store).await
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("LOG_FORMAT").map_or(false, |f| f.eq_ignore_ascii_case("json")) {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn run(store: Arc<dyn ConfigStore>) -> Result<(), Box<dyn std::error::Error>> {
    let settings = store.get()?;
    let http = reqwest::Client::builder()
        .timeout(settings.request_timeout()?)
        .build()?;

    let edge = Arc::new(EsaProvider::new(store.clone(), http.clone()));
    let authoritative: Vec<Arc<dyn DnsProvider>> = vec![
        Arc::new(AlidnsProvider::new(store.clone(), http.clone())),
        Arc::new(DnspodProvider::new(store.clone(), http.clone())),
    ];
    let provisioner = Provisioner::new(
        edge,
        authoritative,
        RateLimit::per_second(settings.provider_rate_limit()),
    );

    let scheduler = Scheduler::new(store, LuckySource::new(http), provisioner);
    if let Err(e) = scheduler.reload() {
        error!(error = %e, "failed to start scheduler");
    }

    wait_for_shutdown(&scheduler).await?;

    scheduler.stop();
    info!("shutting down");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown(scheduler: &Scheduler<LuckySource>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => return res,
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading schedule");
                if let Err(e) = scheduler.reload() {
                    error!(error = %e, "reload failed");
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_scheduler: &Scheduler<LuckySource>) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
