//! Provision a collecting extension, load a few documents, page through a
//! search and clean up again.
//!
//! Connection settings come from an optional properties file given as the
//! first argument, overridden by `DOCDB_*` environment variables.

use anyhow::Result;
use docdb_rs::{
    ClientSession, ConnectionConfig, DocDbError, ExtensionDescriptor, ExtensionMetadata, Format,
    Properties, Provisioning, QueryOptions, Role, SearchCollector, SeedDocument, scoped,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const EXTENSION: &str = "collect";
const OPTIONS: &str = "collect-opts";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ConnectionConfig::load(path)?,
        None => ConnectionConfig::resolve(&[
            Properties::default()
                .with("host", "localhost")
                .with("port", "8003")
                .with("authentication_type", "digest"),
            Properties::from_env(),
        ])?,
    };
    info!(host = %config.host, port = config.port, auth = config.auth_type.as_str(), "connecting");

    let [get, post] = SearchCollector::method_parameters();
    let mut setup = Provisioning::new()
        .extension(
            ExtensionDescriptor::new(EXTENSION)
                .metadata(ExtensionMetadata {
                    title: Some("Search collector".into()),
                    version: Some("1.0".into()),
                    ..Default::default()
                })
                .source(include_str!("collect.xqy"))
                .method(get)
                .method(post),
        )
        .options(OPTIONS, QueryOptions::xml(
            r#"<options xmlns="http://marklogic.com/appservices/search"><return-results>true</return-results></options>"#,
        ));
    for (i, status) in ["open", "closed", "open", "open", "closed"].iter().enumerate() {
        setup = setup.document(SeedDocument::new(
            format!("/demo/ticket-{i}.xml"),
            Format::Xml,
            format!("<ticket><id>{i}</id><status>{status}</status></ticket>"),
        ));
    }

    let admin = ClientSession::open(&config, Role::Admin).await?;
    let outcome = run(&config, &mut setup, &admin).await;
    let report = setup.teardown(&admin).await;
    admin.release()?;
    if !report.is_clean() {
        for (what, err) in &report.failed {
            eprintln!("cleanup failed for {what}: {err}");
        }
    }
    outcome
}

async fn run(
    config: &ConnectionConfig,
    setup: &mut Provisioning,
    admin: &ClientSession,
) -> Result<()> {
    setup.install(admin).await?;

    let reader = ClientSession::open(config, Role::Reader).await?;
    scoped(reader, |reader| async move {
        let mut results = reader
            .search_collector(EXTENSION)
            .page_length(2)
            .collect("open", 1, OPTIONS)
            .await?;
        let printed = async {
            println!("total matches: {}", results.search_result()?.total());
            while results.has_next().await? {
                let doc = results.next().await?;
                println!("{} => {}", doc.uri, doc.as_str().unwrap_or("<binary>"));
            }
            Ok::<_, DocDbError>(())
        }
        .await;
        results.close();
        printed
    })
    .await?;
    Ok(())
}
