use anyhow::Context;
use reportsink::archive::{SqlSubmissionArchive, SubmissionArchive};
use reportsink::artifacts::ArtifactStore;
use reportsink::config::ServiceConfig;
use reportsink::consumer::{LapinSubmissionConsumer, SubmissionListener};
use reportsink::definitions::{DefinitionCache, SqlDefinitionSource};
use reportsink::dump::MessageDump;
use reportsink::engines::{FormulaEvaluator, ReportModelEngine, TemplateRequirementSource};
use reportsink::model::{
    BasicFormulaEvaluator, LopdfStatusRenderer, QuickXmlModelEngine, StaticTemplateSource,
};
use reportsink::notify::Notifier;
use reportsink::registry::{RegistrySource, SqlRegistrySource};
use reportsink::status_store::{SqlStatusStore, StatusStore};
use reportsink::submission::dynamic::DynamicFieldStage;
use reportsink::submission::extract::ExtractionStage;
use reportsink::submission::finalizer::Finalizer;
use reportsink::submission::formula::FormulaStage;
use reportsink::submission::header::HeaderStage;
use reportsink::submission::metadata::MetadataStage;
use reportsink::submission::processor::SubmissionProcessor;
use reportsink::submission::schema::SchemaStage;
use reportsink::submission::stage::StageChain;
use reportsink::submission::templates::TemplateStage;
use reportsink::telemetry;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    let config = ServiceConfig::load().context("failed to load configuration")?;

    let mut pool_options = PgPoolOptions::new();
    if let Some(max_connections) = config.database.max_connections {
        pool_options = pool_options.max_connections(max_connections);
    }
    let pool = pool_options
        .connect(&config.database.url)
        .await
        .context("failed to connect to the database")?;

    let registry: Arc<dyn RegistrySource> = Arc::new(SqlRegistrySource::new(pool.clone()));
    let status_store: Arc<dyn StatusStore> = Arc::new(SqlStatusStore::new(pool.clone()));
    let archive: Arc<dyn SubmissionArchive> = Arc::new(SqlSubmissionArchive::new(pool.clone()));
    let definitions = Arc::new(DefinitionCache::new(Arc::new(SqlDefinitionSource::new(
        pool.clone(),
    ))));

    let store = ArtifactStore::new(&config.storage);
    let model_engine: Arc<dyn ReportModelEngine> = Arc::new(QuickXmlModelEngine);
    let evaluator: Arc<dyn FormulaEvaluator> = Arc::new(BasicFormulaEvaluator);
    let templates: Arc<dyn TemplateRequirementSource> =
        Arc::new(StaticTemplateSource::default());

    let chain = StageChain::new(vec![
        Box::new(MetadataStage::new(
            registry,
            config.certificate.subject_prefix.clone(),
        )),
        Box::new(ExtractionStage::new(store.clone())),
        Box::new(SchemaStage::new(model_engine)),
        Box::new(HeaderStage),
        Box::new(DynamicFieldStage),
        Box::new(TemplateStage::new(templates)),
        Box::new(FormulaStage::new(definitions, evaluator)),
    ]);

    let notifier = Notifier::default();
    let finalizer = Finalizer::new(store, archive, notifier)
        .with_pdf_renderer(Arc::new(LopdfStatusRenderer));
    let processor = Arc::new(SubmissionProcessor::new(status_store, chain, finalizer));

    let dump = MessageDump::new(config.storage.message_dump_dir.clone());
    let listener = Arc::new(SubmissionListener::new(processor, dump));

    let shutdown = CancellationToken::new();
    let consumer_count = config.amqp.consumer_count.max(1);
    let mut tasks = Vec::with_capacity(consumer_count);

    for _ in 0..consumer_count {
        let consumer = LapinSubmissionConsumer::connect(config.amqp.clone())
            .await
            .context("failed to start queue consumer")?;
        let listener = Arc::clone(&listener);
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            listener.run(consumer, shutdown).await;
        }));
    }

    tracing::info!(
        target: "reportsink::app",
        event = "service_started",
        queue = %config.amqp.queue,
        consumers = consumer_count,
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!(
        target: "reportsink::app",
        event = "shutdown_requested",
    );
    shutdown.cancel();

    for task in tasks {
        if let Err(err) = task.await {
            tracing::warn!(
                target: "reportsink::app",
                event = "consumer_task_failed",
                error = %err,
            );
        }
    }

    tracing::info!(
        target: "reportsink::app",
        event = "service_stopped",
    );

    Ok(())
}
