use std::sync::Arc;

use actix_cors::Cors;
use actix_web::dev::Service;
use actix_web::{App, HttpServer, middleware, web};
use tracing::info;
use tracing_subscriber::EnvFilter;

use slotbook::auth::{AdminSecret, StateTokens, VatsimOAuth};
use slotbook::config::Config;
use slotbook::http::{self, AppState};
use slotbook::observability::{self, HTTP_REQUESTS_TOTAL, route_label};
use slotbook::reaper;
use slotbook::roster::VatsimRoster;
use slotbook::store::Store;

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    observability::init(config.metrics_port)?;
    http::set_verbose_errors(!config.production);

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(Store::open(config.wal_path())?);
    let state_tokens = Arc::new(StateTokens::new());

    tokio::spawn(reaper::run_reaper(store.clone(), state_tokens.clone()));
    tokio::spawn(reaper::run_compactor(store.clone(), config.compact_threshold));

    let oauth = Arc::new(VatsimOAuth::new(config.oauth.clone())?);
    let roster = Arc::new(VatsimRoster::new(
        config.roster_base_url.clone(),
        config.roster_api_key.clone(),
        config.outbound_timeout,
    )?);
    if config.oauth.client_id.is_none() {
        tracing::warn!("VATSIM OAuth is not configured; portal login is disabled");
    }

    let state = web::Data::new(
        AppState::new(store, AdminSecret::new(&config.secret_key), state_tokens, oauth, roster)
            .with_frontend(config.frontend_url.clone(), config.production),
    );

    let addr = format!("{}:{}", config.bind, config.port);
    info!("slotbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  cors origin: {}", config.cors_origin);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let cors_origin = config.cors_origin.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap_fn(|req, srv| {
                let route = route_label(req.path());
                let fut = srv.call(req);
                async move {
                    let res = fut.await?;
                    metrics::counter!(
                        HTTP_REQUESTS_TOTAL,
                        "route" => route,
                        "status" => res.status().as_u16().to_string()
                    )
                    .increment(1);
                    Ok(res)
                }
            })
            .wrap(middleware::Logger::default())
            .wrap(
                Cors::default()
                    .allowed_origin(&cors_origin)
                    .allow_any_method()
                    .allow_any_header()
                    .supports_credentials(),
            )
            .configure(http::configure)
            .default_service(web::to(http::not_found))
    })
    .bind(&addr)?
    .run()
    .await?;

    info!("slotbook stopped");
    Ok(())
}
