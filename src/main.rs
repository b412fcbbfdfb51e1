use std::{process, sync::Arc, time::Duration};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use stampa::{
    application::{
        dispatch::{Dispatcher, TemplateCatalog},
        documents::DocumentService,
        engine::LifecycleEngine,
        error::AppError,
        jobs::{
            JobWorkerContext, RetrySweepContext, process_render_document_job,
            process_retry_sweep_job,
        },
        repos::JobStore,
        retry::RetryService,
    },
    config,
    domain::types::JobType,
    infra::{
        db::PostgresJobStore,
        error::InfraError,
        http::{self, ApiState},
        storage::ArtifactStorage,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::SweepFailed(args) => run_sweep_failed(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = init_job_store(&settings).await?;
    let app = build_application_context(store.clone(), &settings)?;

    info!(
        target = "stampa::startup",
        addr = %settings.server.listen_addr,
        workers = settings.jobs.worker_concurrency.get(),
        max_retries = settings.jobs.max_retries,
        retry_delay_secs = settings.jobs.retry_delay.as_secs(),
        result_retention_secs = settings.jobs.result_retention.as_secs(),
        time_limit_secs = settings.jobs.time_limit.map(|limit| limit.as_secs()),
        soft_time_limit_secs = settings.jobs.soft_time_limit.map(|limit| limit.as_secs()),
        "starting document service; retention and time limits are advisory"
    );

    let monitor_handle = spawn_job_monitor(&store, app.job_context, app.sweep_context, &settings);

    let result = serve_http(&settings, app.api_state).await;

    monitor_handle.abort();
    let _ = monitor_handle.await;

    result
}

async fn run_sweep_failed(
    settings: config::Settings,
    args: config::SweepFailedArgs,
) -> Result<(), AppError> {
    let store = init_job_store(&settings).await?;
    let app = build_application_context(store, &settings)?;

    let window = args
        .hours
        .map(|hours| Duration::from_secs(hours * 3600))
        .unwrap_or(settings.scheduler.sweep_window);
    let limit = args.limit.unwrap_or(settings.scheduler.sweep_limit);

    info!(
        target = "stampa::sweep",
        window_secs = window.as_secs(),
        limit,
        "Starting failed-job sweep"
    );

    let report = app
        .sweep_context
        .retry
        .sweep(window, limit)
        .await
        .map_err(AppError::from)?;

    info!(
        target = "stampa::sweep",
        scanned = report.scanned,
        retried = report.retried,
        "Sweep completed"
    );

    Ok(())
}

struct ApplicationContext {
    api_state: ApiState,
    job_context: JobWorkerContext,
    sweep_context: RetrySweepContext,
}

async fn init_job_store(settings: &config::Settings) -> Result<Arc<PostgresJobStore>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresJobStore::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    if settings.database.run_migrations {
        PostgresJobStore::run_migrations(&pool)
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
        PostgresStorage::setup(&pool)
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    }

    Ok(Arc::new(PostgresJobStore::new(pool)))
}

fn build_application_context(
    store: Arc<PostgresJobStore>,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let job_store: Arc<dyn JobStore> = store;

    let catalog = Arc::new(TemplateCatalog::new(
        settings.templates.dir.clone(),
        settings.templates.map.clone(),
    ));
    let storage = Arc::new(
        ArtifactStorage::new(settings.storage.root.clone())
            .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );

    let dispatcher = Arc::new(Dispatcher::new(
        job_store.clone(),
        catalog.clone(),
        settings.jobs.retry_delay,
    ));
    let documents = Arc::new(DocumentService::new(
        job_store.clone(),
        storage.clone(),
        dispatcher.clone(),
    ));
    let engine = Arc::new(LifecycleEngine::new(
        job_store.clone(),
        storage.clone(),
        catalog.clone(),
    ));
    let retry = Arc::new(RetryService::new(job_store.clone(), dispatcher.clone()));

    let api_state = ApiState {
        documents,
        store: job_store,
    };

    let job_context = JobWorkerContext {
        engine,
        dispatcher,
        max_retries: settings.jobs.max_retries,
    };

    let sweep_context = RetrySweepContext {
        retry,
        window: settings.scheduler.sweep_window,
        limit: settings.scheduler.sweep_limit,
    };

    Ok(ApplicationContext {
        api_state,
        job_context,
        sweep_context,
    })
}

fn spawn_job_monitor(
    store: &Arc<PostgresJobStore>,
    context: JobWorkerContext,
    sweep_context: RetrySweepContext,
    settings: &config::Settings,
) -> tokio::task::JoinHandle<()> {
    let render_storage = PostgresStorage::new_with_config(
        store.pool().clone(),
        ApalisSqlConfig::new(JobType::RenderDocument.as_str()),
    );

    let render_concurrency = settings.jobs.worker_concurrency.get() as usize;

    let render_worker = WorkerBuilder::new("render-document-worker")
        .concurrency(render_concurrency)
        .data(context)
        .backend(render_storage)
        .build_fn(process_render_document_job);

    let mut monitor = Monitor::new().register(render_worker);

    if settings.scheduler.sweep_enabled {
        let sweep_worker = WorkerBuilder::new("retry-sweep-worker")
            .data(sweep_context)
            .backend(CronStream::new(settings.scheduler.sweep_schedule.clone()))
            .build_fn(process_retry_sweep_job);
        monitor = monitor.register(sweep_worker);
    }

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    })
}

async fn serve_http(settings: &config::Settings, api_state: ApiState) -> Result<(), AppError> {
    let router = http::build_router(api_state, settings.server.upload_body_limit);

    let listener = tokio::net::TcpListener::bind(settings.server.listen_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
