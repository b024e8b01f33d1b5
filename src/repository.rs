//! Read access to configuration entities owned by an external store.
//!
//! The engine only reads suites, cases, environments and variables. The
//! in-memory implementation backs the CLI (loaded from a JSON fixture file)
//! and the tests.

use crate::domain::{EnvVariable, Environment, SuiteCase, TestCase, TestSuite};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Abstract configuration repository.
pub trait ConfigRepository: Send + Sync {
    fn get_suite(&self, suite_id: &str) -> RepoFuture<'_, TestSuite>;

    /// Enabled links of a suite, ordered by execution order.
    fn get_enabled_suite_cases(&self, suite_id: &str) -> RepoFuture<'_, Vec<SuiteCase>>;

    fn get_test_case(&self, id: &str) -> RepoFuture<'_, TestCase>;

    fn get_environment(&self, id: &str) -> RepoFuture<'_, Environment>;

    /// Global variables scoped to an environment.
    fn get_global_variables(&self, environment_id: &str) -> RepoFuture<'_, Vec<EnvVariable>>;
}

/// A suite with its case links, as written in a fixture file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteFixture {
    #[serde(flatten)]
    pub suite: TestSuite,
    #[serde(default)]
    pub cases: Vec<SuiteCaseFixture>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteCaseFixture {
    #[serde(default)]
    pub id: Option<String>,
    pub test_case_id: String,
    #[serde(default)]
    pub execution_order: i32,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub created_at: u64,
}

fn default_enabled() -> bool {
    true
}

/// Everything the engine reads, in one JSON document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    #[serde(default)]
    pub environments: Vec<Environment>,
    /// Global variables keyed by environment id.
    #[serde(default)]
    pub global_variables: HashMap<String, Vec<EnvVariable>>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub suites: Vec<SuiteFixture>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            Error::Repository(format!("Failed to read fixture file `{}`: {err}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            Error::Repository(format!("Failed to parse fixture file `{}`: {err}", path.display()))
        })
    }
}

#[derive(Debug, Default)]
struct Entities {
    suites: HashMap<String, TestSuite>,
    suite_cases: HashMap<String, Vec<SuiteCase>>,
    test_cases: HashMap<String, TestCase>,
    environments: HashMap<String, Environment>,
    global_variables: HashMap<String, Vec<EnvVariable>>,
}

/// In-memory repository implementation.
pub struct InMemoryRepository {
    entities: tokio::sync::RwLock<Entities>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            entities: tokio::sync::RwLock::new(Entities::default()),
        }
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let mut entities = Entities::default();
        for env in fixture.environments {
            entities.environments.insert(env.id.clone(), env);
        }
        entities.global_variables = fixture.global_variables;
        for case in fixture.test_cases {
            entities.test_cases.insert(case.id.clone(), case);
        }
        for SuiteFixture { suite, cases } in fixture.suites {
            let links = cases
                .into_iter()
                .map(|link| SuiteCase {
                    id: link
                        .id
                        .unwrap_or_else(|| format!("{}:{}", suite.id, link.test_case_id)),
                    suite_id: suite.id.clone(),
                    test_case_id: link.test_case_id,
                    execution_order: link.execution_order,
                    is_enabled: link.is_enabled,
                    created_at: link.created_at,
                })
                .collect();
            entities.suite_cases.insert(suite.id.clone(), links);
            entities.suites.insert(suite.id.clone(), suite);
        }
        Self {
            entities: tokio::sync::RwLock::new(entities),
        }
    }

    pub async fn insert_suite(&self, suite: TestSuite, links: Vec<SuiteCase>) {
        let mut entities = self.entities.write().await;
        entities.suite_cases.insert(suite.id.clone(), links);
        entities.suites.insert(suite.id.clone(), suite);
    }

    pub async fn insert_test_case(&self, case: TestCase) {
        self.entities.write().await.test_cases.insert(case.id.clone(), case);
    }

    pub async fn insert_environment(&self, environment: Environment) {
        self.entities
            .write()
            .await
            .environments
            .insert(environment.id.clone(), environment);
    }

    pub async fn insert_global_variables(&self, environment_id: &str, variables: Vec<EnvVariable>) {
        self.entities
            .write()
            .await
            .global_variables
            .insert(environment_id.to_string(), variables);
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigRepository for InMemoryRepository {
    fn get_suite(&self, suite_id: &str) -> RepoFuture<'_, TestSuite> {
        let suite_id = suite_id.to_string();
        Box::pin(async move {
            self.entities
                .read()
                .await
                .suites
                .get(&suite_id)
                .cloned()
                .ok_or_else(|| Error::Repository(format!("Test suite not found: {suite_id}")))
        })
    }

    fn get_enabled_suite_cases(&self, suite_id: &str) -> RepoFuture<'_, Vec<SuiteCase>> {
        let suite_id = suite_id.to_string();
        Box::pin(async move {
            let entities = self.entities.read().await;
            let mut links: Vec<SuiteCase> = entities
                .suite_cases
                .get(&suite_id)
                .ok_or_else(|| Error::Repository(format!("Test suite not found: {suite_id}")))?
                .iter()
                .filter(|link| link.is_enabled)
                .cloned()
                .collect();
            links.sort_by_key(|link| link.execution_order);
            Ok(links)
        })
    }

    fn get_test_case(&self, id: &str) -> RepoFuture<'_, TestCase> {
        let id = id.to_string();
        Box::pin(async move {
            self.entities
                .read()
                .await
                .test_cases
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::Repository(format!("Test case not found: {id}")))
        })
    }

    fn get_environment(&self, id: &str) -> RepoFuture<'_, Environment> {
        let id = id.to_string();
        Box::pin(async move {
            self.entities
                .read()
                .await
                .environments
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::Repository(format!("Test environment not found: {id}")))
        })
    }

    fn get_global_variables(&self, environment_id: &str) -> RepoFuture<'_, Vec<EnvVariable>> {
        let environment_id = environment_id.to_string();
        Box::pin(async move {
            Ok(self
                .entities
                .read()
                .await
                .global_variables
                .get(&environment_id)
                .cloned()
                .unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn fixture_json() -> serde_json::Value {
        json!({
            "environments": [{"id": "dev", "name": "Dev", "baseUrl": "http://localhost:8080"}],
            "globalVariables": {"dev": [{"key": "user", "value": "ada"}]},
            "testCases": [
                {"id": "c1", "name": "List", "config": {"method": "GET", "endpoint": "/items"}},
                {"id": "c2", "name": "Get", "priority": "HIGH", "config": {"method": "GET", "endpoint": "/items/1"}}
            ],
            "suites": [{
                "id": "s1",
                "name": "Smoke",
                "cases": [
                    {"testCaseId": "c2", "executionOrder": 2},
                    {"testCaseId": "c1", "executionOrder": 1},
                    {"testCaseId": "c1", "executionOrder": 3, "isEnabled": false}
                ]
            }]
        })
    }

    #[tokio::test]
    async fn fixture_round_trip_through_repository() {
        let fixture: Fixture = serde_json::from_value(fixture_json()).unwrap();
        let repo = InMemoryRepository::from_fixture(fixture);

        let links = repo.get_enabled_suite_cases("s1").await.unwrap();
        let ids: Vec<&str> = links.iter().map(|l| l.test_case_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(links[0].suite_id, "s1");

        assert_eq!(repo.get_suite("s1").await.unwrap().name, "Smoke");
        assert_eq!(repo.get_environment("dev").await.unwrap().base_url, "http://localhost:8080");
        assert_eq!(repo.get_global_variables("dev").await.unwrap()[0].value, "ada");
        assert!(repo.get_global_variables("prod").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_entities_are_repository_errors() {
        let repo = InMemoryRepository::new();
        assert!(matches!(repo.get_suite("nope").await, Err(Error::Repository(_))));
        assert!(matches!(repo.get_test_case("nope").await, Err(Error::Repository(_))));
        assert!(matches!(repo.get_environment("nope").await, Err(Error::Repository(_))));
    }

    #[test]
    fn fixture_loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", fixture_json()).unwrap();
        let fixture = Fixture::load(file.path()).unwrap();
        assert_eq!(fixture.suites[0].cases.len(), 3);
        assert_eq!(fixture.test_cases.len(), 2);
    }
}
