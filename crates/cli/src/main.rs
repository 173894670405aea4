use anyhow::{bail, Context};
use careview_core::cards::DetailScheme;
use careview_core::config::{
    detail_scheme_from_env_value, population_concurrency_from_env_value,
    population_pool_capacity_from_env_value, provisional_ttl_from_env_value,
    request_timeout_from_env_value,
};
use careview_core::constants::MAX_CODES_PER_QUERY;
use careview_core::query::{BatchQueryEngine, HttpFhirClient};
use careview_core::value_set::{ValueSet, ValueSetLookup};
use careview_core::{
    Catalog, CoreConfig, CoreServices, Credentials, ResourceKind, SessionIdentity,
};
use careview_types::{Audience, SessionId};
use clap::{Parser, Subcommand};
use fhir::{Encounter, Observation, ObservationData};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "careview")]
#[command(about = "Careview clinical cache and recommendation-card tools")]
struct Cli {
    /// Clinical catalog YAML (defaults to CAREVIEW_CATALOG)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a clinical catalog and print a summary
    CheckCatalog {
        /// Catalog file
        path: PathBuf,
    },
    /// Run a batched value-set query against the FHIR server
    Query {
        /// Value set oid from the catalog
        #[arg(long)]
        oid: String,
        /// FHIR resource type to search
        #[arg(long)]
        resource: String,
        /// Restrict the search to one patient
        #[arg(long)]
        patient: Option<String>,
    },
    /// Resolve where a reading was taken
    Classify {
        /// Encounter resource JSON file
        #[arg(long)]
        encounter: PathBuf,
        /// Observation resource JSON file
        #[arg(long)]
        observation: Option<PathBuf>,
    },
    /// Refresh and print a patient's recommendation cards
    Cards {
        /// FHIR logical patient id
        #[arg(long)]
        patient: String,
        /// patient or care-team
        #[arg(long, default_value = "patient")]
        audience: String,
    },
}

/// Values read from the process environment once at startup.
struct Environment {
    fhir_url: Option<String>,
    fhir_token: Option<String>,
    hooks_url: Option<String>,
    catalog: Option<String>,
    request_timeout: Duration,
    population_concurrency: usize,
    population_pool_capacity: usize,
    provisional_ttl: Duration,
    detail_scheme: DetailScheme,
}

impl Environment {
    fn read() -> anyhow::Result<Self> {
        let var = |name: &str| std::env::var(name).ok();
        Ok(Self {
            fhir_url: var("CAREVIEW_FHIR_URL"),
            fhir_token: var("CAREVIEW_FHIR_TOKEN"),
            hooks_url: var("CAREVIEW_HOOKS_URL"),
            catalog: var("CAREVIEW_CATALOG"),
            request_timeout: request_timeout_from_env_value(var("CAREVIEW_REQUEST_TIMEOUT_SECS"))?,
            population_concurrency: population_concurrency_from_env_value(var(
                "CAREVIEW_POPULATION_CONCURRENCY",
            ))?,
            population_pool_capacity: population_pool_capacity_from_env_value(var(
                "CAREVIEW_POPULATION_POOL_CAPACITY",
            ))?,
            provisional_ttl: provisional_ttl_from_env_value(var("CAREVIEW_PROVISIONAL_TTL_SECS"))?,
            detail_scheme: detail_scheme_from_env_value(var("CAREVIEW_DETAIL_SCHEME"))?,
        })
    }

    fn catalog(&self, flag: Option<PathBuf>) -> anyhow::Result<Catalog> {
        let path = flag
            .or_else(|| self.catalog.clone().map(PathBuf::from))
            .context("no catalog given (use --catalog or CAREVIEW_CATALOG)")?;
        Ok(Catalog::load(&path)?)
    }

    fn fhir_url(&self) -> anyhow::Result<String> {
        self.fhir_url
            .clone()
            .context("CAREVIEW_FHIR_URL is not set")
    }

    fn config(&self) -> anyhow::Result<CoreConfig> {
        let hooks_url = self
            .hooks_url
            .clone()
            .context("CAREVIEW_HOOKS_URL is not set")?;
        Ok(CoreConfig::new(self.fhir_url()?, hooks_url)?
            .with_request_timeout(self.request_timeout)
            .with_population_concurrency(self.population_concurrency)
            .with_population_pool_capacity(self.population_pool_capacity)
            .with_provisional_ttl(self.provisional_ttl)
            .with_detail_scheme(self.detail_scheme))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("careview=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let env = Environment::read()?;

    match cli.command {
        Commands::CheckCatalog { path } => check_catalog(&path),
        Commands::Query {
            oid,
            resource,
            patient,
        } => {
            let catalog = env.catalog(cli.catalog)?;
            query(&env, &catalog, &oid, &resource, patient).await
        }
        Commands::Classify {
            encounter,
            observation,
        } => {
            let catalog = env.catalog(cli.catalog)?;
            classify(&catalog, &encounter, observation.as_deref())
        }
        Commands::Cards { patient, audience } => {
            let catalog = env.catalog(cli.catalog)?;
            cards(&env, catalog, patient, &audience).await
        }
    }
}

fn check_catalog(path: &Path) -> anyhow::Result<()> {
    let catalog = Catalog::load(path)?;

    let mut oids: Vec<&str> = catalog.value_sets().oids().collect();
    oids.sort_unstable();
    println!("{} value set(s)", oids.len());
    for oid in oids {
        if let Some(set) = catalog.value_sets().value_set(oid) {
            println!("  {oid}: {} concept(s) {}", set.len(), set.name().unwrap_or(""));
        }
    }

    for kind in ResourceKind::ALL {
        if let Some(binding) = catalog.binding(kind) {
            let coded = binding
                .value_set()
                .map(|vs| format!("value set {}", vs.oid()))
                .unwrap_or_else(|| "all".to_string());
            println!("{kind}: {} ({coded})", binding.resource_type());
        }
    }

    let rules = catalog.source_rules();
    println!(
        "source rules: encounter-based classification {}",
        if rules.uses_encounters() { "enabled" } else { "disabled" }
    );
    println!("catalog OK");
    Ok(())
}

async fn query(
    env: &Environment,
    catalog: &Catalog,
    oid: &str,
    resource: &str,
    patient: Option<String>,
) -> anyhow::Result<()> {
    let Some(value_set) = catalog.value_sets().value_set(oid) else {
        bail!("value set {oid} is not in the catalog");
    };

    let mut client = HttpFhirClient::new(env.fhir_url()?, env.request_timeout)?;
    if let Some(token) = &env.fhir_token {
        client = client.with_bearer_token(token);
    }
    let mut engine = BatchQueryEngine::new(Arc::new(client));
    if let Some(patient) = patient {
        engine = engine.with_subject(patient);
    }

    print_batches(&value_set);
    let entries = engine.query_by_value_set(resource, &value_set).await?;
    println!("{} {resource} entr(ies)", entries.len());
    for entry in &entries {
        println!(
            "  {}/{}",
            entry.resource_type().unwrap_or("?"),
            entry.resource_id().unwrap_or("?")
        );
    }
    Ok(())
}

fn print_batches(value_set: &ValueSet) {
    println!(
        "value set {} has {} concept(s) in {} batch(es)",
        value_set.oid(),
        value_set.len(),
        value_set.batches(MAX_CODES_PER_QUERY).count()
    );
    for (index, batch) in value_set.batches(MAX_CODES_PER_QUERY).enumerate() {
        println!("  batch {index}: {} code(s)", batch.len());
    }
}

fn classify(catalog: &Catalog, encounter: &Path, observation: Option<&Path>) -> anyhow::Result<()> {
    let encounter_text = std::fs::read_to_string(encounter)
        .with_context(|| format!("reading {}", encounter.display()))?;
    let encounter = Encounter::parse(&encounter_text)?;

    let observation = match observation {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Observation::parse(&text)?
        }
        None => ObservationData::default(),
    };

    let source = catalog
        .source_rules()
        .resolve_source(&observation, Some(&encounter));
    println!("{source}");
    Ok(())
}

async fn cards(
    env: &Environment,
    catalog: Catalog,
    patient: String,
    audience: &str,
) -> anyhow::Result<()> {
    let audience: Audience = audience.parse()?;
    let config = env.config()?;
    let credentials = Credentials::new(
        config.fhir_base_url(),
        env.fhir_token.clone().unwrap_or_default(),
    );
    let services = CoreServices::new(config, catalog)?;

    let session_id = SessionId::new(uuid::Uuid::new_v4().to_string())?;
    let session = services.sessions.create(
        session_id.clone(),
        SessionIdentity {
            credentials,
            audience,
            patient_id: patient,
        },
    );

    let refreshed = services.cards.refresh(&session).await;
    tracing::info!(session = %session_id, groups = refreshed.len(), "cards refreshed");
    for (hook_id, cards) in session.cards().groups(audience).await {
        println!("== {hook_id}");
        for card in cards {
            println!("{}", serde_json::to_string_pretty(&card.to_json())?);
        }
    }

    services.sessions.destroy(&session_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_query_arguments() {
        let cli = Cli::parse_from([
            "careview",
            "--catalog",
            "catalog.yaml",
            "query",
            "--oid",
            "1.2.3",
            "--resource",
            "Observation",
        ]);
        assert_eq!(cli.catalog.as_deref(), Some(Path::new("catalog.yaml")));
        assert!(matches!(
            cli.command,
            Commands::Query { oid, patient: None, .. } if oid == "1.2.3"
        ));
    }
}
