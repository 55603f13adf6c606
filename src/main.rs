use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use scenario_trainer::{
    api,
    app_state::AppState,
    config::AppConfig,
    ingest::{self, DocumentSource, FixedWindow, StructuralHeader},
    llm::{CompletionService, LlmManager},
    models::Category,
    rag::Assessor,
    session::{EngineSettings, SessionEngine, SERVED_CATEGORIES},
    telegram::TelegramTransport,
};
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración (la falta de secretos es fatal)
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Indexar escenarios y validar categorías antes de servir peticiones
    let sources: Vec<DocumentSource> = cfg
        .scenario_docs
        .iter()
        .map(|doc| DocumentSource {
            path: doc.path.clone(),
            strategy: Box::new(StructuralHeader::default()),
            default_category: doc.category.unwrap_or(Category::Generic),
        })
        .collect();
    let scenarios = Arc::new(
        ingest::build_from_sources(&sources).context("Error indexando los escenarios")?,
    );
    scenarios
        .ensure_categories(&SERVED_CATEGORIES)
        .context("Corpus de escenarios incompleto")?;
    let corpus = scenarios.corpus();
    info!(
        "📚 Corpus listo: {} unidades ({} cấp cứu, {} giao tiếp, {} genéricas), {} términos.",
        corpus.len(),
        corpus.count(Category::Emergency),
        corpus.count(Category::Communication),
        corpus.count(Category::Generic),
        scenarios.index().dimensions()
    );

    // 4. Documento de referencia opcional (ventanas fijas)
    let references = match &cfg.reference_doc {
        Some(path) => {
            let window = FixedWindow::new(cfg.chunk_size, cfg.chunk_overlap)?;
            let retriever = ingest::build(path, &window)
                .with_context(|| format!("Error indexando {}", path.display()))?;
            info!("📖 Referencia indexada: {} fragmentos.", retriever.corpus().len());
            Arc::new(retriever)
        }
        None => scenarios.clone(),
    };

    // 5. Motor de sesiones
    let llm: Arc<dyn CompletionService> = Arc::new(LlmManager::from_config(&cfg)?);
    let assessor = Assessor::new(references, llm, cfg.llm_temperature, cfg.llm_max_tokens);
    let engine = Arc::new(SessionEngine::new(
        scenarios,
        assessor,
        EngineSettings {
            batch_size: cfg.batch_size,
            continue_delay: cfg.continue_delay,
        },
    ));

    // 6. Transporte Telegram
    let telegram_task = match (&cfg.telegram_token, cfg.transport.telegram()) {
        (Some(token), true) => {
            let transport = Arc::new(TelegramTransport::new(token)?);
            Some(tokio::spawn(transport.run(engine.clone())))
        }
        _ => None,
    };

    // 7. Espejo web
    if cfg.transport.web() {
        serve_web(cfg, engine).await?;
    } else if let Some(task) = telegram_task {
        task.await.context("La tarea de Telegram terminó de forma inesperada")??;
    }

    Ok(())
}

async fn serve_web(cfg: AppConfig, engine: Arc<SessionEngine>) -> Result<()> {
    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let app_state = AppState::new(cfg, engine, shutdown_tx);

    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new("frontend"))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Formulario web escuchando en {}", &server_url);

    if app_state.config.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
