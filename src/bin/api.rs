use scan_advisor::{
    api::start_server,
    cache::MemoryPageCache,
    config::AdvisorConfig,
    knowledge::{
        DocsRetriever, GithubWikiSource, HttpSemanticIndex, KnowledgeRetriever, SearxngSearch,
        SemanticIndex, WebRetriever, WebSearch,
    },
    pipeline::AdvisorPipeline,
    planner::LlmPlanner,
    provider::{ChatProvider, HttpChatProvider},
    runtime::{
        AccountDataProvider, HttpAccountClient, RuntimeContextBuilder, StaticSessionProvider,
        UnconfiguredAccounts,
    },
    verification::create_default_answer_validator,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(AdvisorConfig::from_env());
    let timeouts = config.timeouts.clone();

    info!("Scan Advisor - API Server");
    info!("Port: {}", config.port);
    info!("Default provider: {}", config.default_provider);

    // One pooled client for every HTTP collaborator
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let provider: Arc<dyn ChatProvider> = Arc::new(HttpChatProvider::new(client.clone()));
    let planner = Arc::new(LlmPlanner::new(provider.clone(), timeouts.planner));

    let sessions = Arc::new(StaticSessionProvider::new(
        config.account_id.clone(),
        config.account_access_token.clone(),
    ));
    let accounts: Arc<dyn AccountDataProvider> = match &config.account_api_base_url {
        Some(url) => Arc::new(HttpAccountClient::new(client.clone(), url, timeouts.doc_page)),
        None => {
            warn!("ACCOUNT_API_BASE_URL not set, runtime account context disabled");
            Arc::new(UnconfiguredAccounts)
        }
    };

    let docs = Arc::new(GithubWikiSource::new(
        client.clone(),
        &config.wiki_raw_base,
        config.readme_path.clone(),
        timeouts.doc_page,
    ));
    let index = config.semantic_index_url.as_deref().map(|url| {
        Arc::new(HttpSemanticIndex::new(client.clone(), url, timeouts.doc_page))
            as Arc<dyn SemanticIndex>
    });
    let search = config.searxng_url.as_deref().map(|url| {
        Arc::new(SearxngSearch::new(client.clone(), url, timeouts.web_query)) as Arc<dyn WebSearch>
    });
    if search.is_none() {
        warn!("ADVISOR_SEARXNG_URL not set, web retrieval disabled");
    }

    let knowledge = KnowledgeRetriever::new(
        DocsRetriever::new(docs, index, Arc::new(MemoryPageCache::new())),
        WebRetriever::new(search, timeouts.web_query),
    );

    let pipeline = Arc::new(AdvisorPipeline::new(
        planner,
        provider,
        RuntimeContextBuilder::new(sessions, accounts),
        knowledge,
        create_default_answer_validator(),
        timeouts,
    ));

    info!("Advisory pipeline initialized");
    info!("Starting API server...");

    start_server(pipeline, config).await?;

    Ok(())
}
