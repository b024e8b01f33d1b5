//! Scripted collaborators shared by the engine and service tests.

use crate::domain::{
    millis, EnvVariable, Environment, Priority, RequestDescriptor, ResponsePayload, SuiteCase,
    TestCase, TestSuite, TestType,
};
use crate::engine::http::{Transport, TransportFuture};
use crate::error::Error;
use crate::repository::{ConfigRepository, InMemoryRepository, RepoFuture};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Reply {
    Json(u16, Value),
    Text(u16, String),
    Slow(u16, String, u64),
    NetworkError(String),
    Hang,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Reply::Json(200, body)
    }
}

type Hook = Box<dyn Fn(usize, &RequestDescriptor) + Send + Sync>;

/// Answers requests from per-URL queues, falling back to `200 {}`.
pub struct MockTransport {
    routes: Mutex<Vec<(String, VecDeque<Reply>)>>,
    fallback: Reply,
    requests: Mutex<Vec<RequestDescriptor>>,
    hook: Mutex<Option<Hook>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            fallback: Reply::ok(serde_json::json!({})),
            requests: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
        }
    }

    pub fn with_fallback(mut self, reply: Reply) -> Self {
        self.fallback = reply;
        self
    }

    /// Queue a reply for the next request whose URL contains `fragment`.
    pub fn on(self, fragment: &str, reply: Reply) -> Self {
        {
            let mut routes = self.routes.lock().unwrap();
            match routes.iter_mut().find(|(f, _)| f == fragment) {
                Some((_, queue)) => queue.push_back(reply),
                None => routes.push((fragment.to_string(), VecDeque::from([reply]))),
            }
        }
        self
    }

    /// Called with the 1-based request count before each reply.
    pub fn on_request(
        self,
        hook: impl Fn(usize, &RequestDescriptor) + Send + Sync + 'static,
    ) -> Self {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
        self
    }

    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, url: &str) -> Reply {
        let mut routes = self.routes.lock().unwrap();
        routes
            .iter_mut()
            .filter(|(fragment, queue)| url.contains(fragment.as_str()) && !queue.is_empty())
            .find_map(|(_, queue)| queue.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

fn payload(status: u16, body: String, elapsed_ms: u64) -> ResponsePayload {
    ResponsePayload {
        status,
        status_text: String::new(),
        headers: HashMap::new(),
        size: body.len() as u64,
        body,
        elapsed_ms,
        content_type: "application/json".into(),
    }
}

impl Transport for MockTransport {
    fn send<'a>(
        &'a self,
        request: &'a RequestDescriptor,
        timeout: Duration,
    ) -> TransportFuture<'a> {
        Box::pin(async move {
            let count = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(request.clone());
                requests.len()
            };
            if let Some(hook) = self.hook.lock().unwrap().as_ref() {
                hook(count, request);
            }
            match self.next_reply(&request.url) {
                Reply::Json(status, body) => Ok(payload(status, body.to_string(), 5)),
                Reply::Text(status, body) => Ok(payload(status, body, 5)),
                Reply::Slow(status, body, delay_ms) => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    Ok(payload(status, body, delay_ms))
                }
                Reply::NetworkError(message) => Err(Error::Network(message)),
                Reply::Hang => {
                    tokio::time::sleep(timeout).await;
                    Err(Error::Timeout(millis(timeout)))
                }
            }
        })
    }
}

/// Repository whose every call fails, for abort paths.
pub struct UnavailableRepository;

impl ConfigRepository for UnavailableRepository {
    fn get_suite(&self, _suite_id: &str) -> RepoFuture<'_, TestSuite> {
        Box::pin(async { Err(Error::Repository("connection refused".into())) })
    }

    fn get_enabled_suite_cases(&self, _suite_id: &str) -> RepoFuture<'_, Vec<SuiteCase>> {
        Box::pin(async { Err(Error::Repository("connection refused".into())) })
    }

    fn get_test_case(&self, _id: &str) -> RepoFuture<'_, TestCase> {
        Box::pin(async { Err(Error::Repository("connection refused".into())) })
    }

    fn get_environment(&self, _id: &str) -> RepoFuture<'_, Environment> {
        Box::pin(async { Err(Error::Repository("connection refused".into())) })
    }

    fn get_global_variables(&self, _environment_id: &str) -> RepoFuture<'_, Vec<EnvVariable>> {
        Box::pin(async { Err(Error::Repository("connection refused".into())) })
    }
}

pub fn environment(base_url: &str) -> Environment {
    Environment {
        id: "env".into(),
        name: "test".into(),
        base_url: base_url.into(),
        headers: HashMap::new(),
        variables: Vec::new(),
        auth: None,
    }
}

pub fn test_case(id: &str, priority: Priority, config: Value) -> TestCase {
    TestCase {
        id: id.into(),
        name: format!("case {id}"),
        description: String::new(),
        test_type: TestType::Api,
        priority,
        config,
        created_at: 0,
    }
}

/// Suite `suite` in environment `env`, cases linked in the given order.
pub async fn repository(environment: Environment, cases: Vec<TestCase>) -> InMemoryRepository {
    let repo = InMemoryRepository::new();
    let links = cases
        .iter()
        .enumerate()
        .map(|(index, case)| SuiteCase {
            id: format!("link-{}", case.id),
            suite_id: "suite".into(),
            test_case_id: case.id.clone(),
            execution_order: index as i32,
            is_enabled: true,
            created_at: 0,
        })
        .collect();
    repo.insert_suite(
        TestSuite {
            id: "suite".into(),
            name: "Suite".into(),
            description: String::new(),
        },
        links,
    )
    .await;
    repo.insert_environment(environment).await;
    for case in cases {
        repo.insert_test_case(case).await;
    }
    repo
}
