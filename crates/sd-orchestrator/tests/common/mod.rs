//! Scripted two-node cluster for pipeline tests
//!
//! Each fake node keeps a model of its roots (git HEAD, application code,
//! commit marker, compose file) and answers the shell commands the pipeline
//! sends. Health and reload endpoints are served by axum and report on the
//! modelled live code, so a swap or rollback is visible over HTTP.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;

use sd_core::config::{DeployConfig, NodeProfile};
use sd_core::retry::RetryPolicy;
use sd_core::traits::{CommandOutput, RemoteExecutor, SharedExecutor, Transport};
use sd_core::{ConnectivityError, ReleaseCandidate};
use sd_orchestrator::{Connector, FixedCandidate, History, Pipeline};

pub const C1: &str = "1111111111111111111111111111111111111111";
pub const C2: &str = "2222222222222222222222222222222222222222";

pub const SENTINEL: &str = "node2";
pub const PRODUCTION: &str = "node1";

pub const LIVE: &str = "/srv/app";
pub const STAGING: &str = "/srv/app-staging";
pub const ROLLBACK: &str = "/srv/app-rollback";

const VALIDATE: &str = "validate-code";
const REBUILD: &str = "rebuild-containers";
const DEFAULT_COMPOSE: &str = "services: v1";

/// One directory on a fake node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Root {
    pub head: Option<String>,
    /// Commit the application files came from
    pub code: Option<String>,
    pub marker: Option<String>,
    pub compose: String,
}

impl Root {
    fn at(commit: &str, compose: &str) -> Self {
        Self {
            head: Some(commit.to_string()),
            code: Some(commit.to_string()),
            marker: None,
            compose: compose.to_string(),
        }
    }

    pub fn commit(&self) -> Option<String> {
        self.marker.clone().or_else(|| self.head.clone())
    }
}

#[derive(Debug, Default)]
pub struct FakeNode {
    pub roots: BTreeMap<String, Root>,
    pub unhealthy_commits: HashSet<String>,
    pub failing_categories: HashSet<String>,
    pub fail_validation: bool,
    pub fail_reload: bool,
    pub rebuilds: usize,
    pub reloads: usize,
    pub log: Vec<String>,
}

impl FakeNode {
    fn new(commit: &str) -> Self {
        let mut roots = BTreeMap::new();
        roots.insert(LIVE.to_string(), Root::at(commit, DEFAULT_COMPOSE));
        roots.insert(STAGING.to_string(), Root::at(commit, DEFAULT_COMPOSE));
        Self {
            roots,
            ..Default::default()
        }
    }

    /// Longest known root containing `path`
    fn root_of(&self, path: &str) -> Option<String> {
        self.roots
            .keys()
            .filter(|root| path == root.as_str() || path.starts_with(&format!("{root}/")))
            .max_by_key(|root| root.len())
            .cloned()
    }

    fn checkout(&mut self, dir: &str, commit: &str, composes: &HashMap<String, String>) -> CommandOutput {
        let compose = compose_of(composes, commit);
        let root = self.roots.entry(dir.to_string()).or_default();
        root.head = Some(commit.to_string());
        root.code = Some(commit.to_string());
        root.compose = compose;
        ok("")
    }

    fn run_in(
        &mut self,
        dir: &str,
        action: &str,
        origin: &str,
        composes: &HashMap<String, String>,
    ) -> CommandOutput {
        if action.starts_with("git ls-remote origin") {
            return ok(&format!("{origin}\trefs/heads/main\n"));
        }
        if let Some(target) = action.strip_prefix("git fetch origin && git reset --hard ") {
            return self.checkout(dir, target.trim(), composes);
        }
        if action.starts_with("git fetch origin") {
            return ok("");
        }
        if action.starts_with("git pull --ff-only") {
            let root = self.roots.get(dir).cloned().unwrap_or_default();
            if root.head.as_deref() == Some(origin) {
                // Already up to date: edited files stay as they are
                return ok("Already up to date.\n");
            }
            if root.code != root.head {
                return fail("error: Your local changes would be overwritten by merge", 1);
            }
            return self.checkout(dir, origin, composes);
        }
        if action.starts_with("git reset --hard origin/") {
            return self.checkout(dir, origin, composes);
        }
        if let Some(target) = action.strip_prefix("git reset --hard ") {
            return self.checkout(dir, target.trim(), composes);
        }
        if action == "git diff --quiet HEAD" {
            let root = self.roots.get(dir).cloned().unwrap_or_default();
            return if root.code == root.head { ok("") } else { fail("", 1) };
        }
        if action == "git rev-parse HEAD" {
            return match self.roots.get(dir).and_then(|r| r.head.clone()) {
                Some(head) => ok(&format!("{head}\n")),
                None => fail("fatal: not a git repository", 128),
            };
        }
        if action.starts_with("cat -- ") {
            let compose = self.roots.get(dir).map(|r| r.compose.clone()).unwrap_or_default();
            return ok(&compose);
        }
        if action == VALIDATE {
            return if self.fail_validation {
                fail("SyntaxError: invalid syntax (app.py, line 3)", 1)
            } else {
                ok("")
            };
        }
        if action == REBUILD {
            self.rebuilds += 1;
            return ok("recreated");
        }
        if action.starts_with("run-regression ") {
            let category = action.split_whitespace().last().unwrap_or_default();
            return if self.failing_categories.contains(category) {
                fail(&format!("FAILED {category}: 1 failed, 4 passed"), 1)
            } else {
                ok("5 passed")
            };
        }
        fail(&format!("unexpected command in {dir}: {action}"), 127)
    }

    fn mirror(&mut self, command: &str) -> CommandOutput {
        let token_after = |marker: &str| {
            command
                .split_once(marker)
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .map(String::from)
        };
        let (Some(src), Some(dst)) = (
            token_after("if [ -d ").and_then(|p| self.root_of(&p)),
            token_after("mkdir -p ").and_then(|p| self.root_of(&p)),
        ) else {
            return fail("mirror: unknown roots", 23);
        };
        let source = self.roots.get(&src).cloned().unwrap_or_default();
        let target = self.roots.entry(dst).or_default();
        target.code = source.code;
        target.compose = source.compose;
        ok("")
    }
}

fn compose_of(composes: &HashMap<String, String>, commit: &str) -> String {
    composes
        .get(commit)
        .cloned()
        .unwrap_or_else(|| DEFAULT_COMPOSE.to_string())
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput::new(stdout, 0)
}

fn fail(stderr: &str, status: u32) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_status: status,
    }
}

#[derive(Debug)]
pub struct ClusterState {
    /// Tip of `origin/main`
    pub origin: String,
    /// Compose file content per commit; unknown commits use the default
    pub composes: HashMap<String, String>,
    pub nodes: HashMap<String, FakeNode>,
}

impl ClusterState {
    fn run(&mut self, node: &str, command: &str) -> CommandOutput {
        let ClusterState {
            origin,
            composes,
            nodes,
        } = self;
        let Some(n) = nodes.get_mut(node) else {
            return fail("no such node", 255);
        };
        n.log.push(command.to_string());

        if let Some(rest) = command.strip_prefix("test -d ") {
            let dir = rest.split_whitespace().next().unwrap_or_default();
            return ok(if n.roots.contains_key(dir) { "yes\n" } else { "no\n" });
        }
        if command.starts_with("set -e; ") {
            return n.mirror(command);
        }
        if command.starts_with("rm -rf ") {
            let tokens: Vec<&str> = command.split_whitespace().collect();
            let (rollback, live) = (tokens[2], tokens[6]);
            let copy = n.roots.get(live).cloned().unwrap_or_default();
            n.roots.insert(rollback.to_string(), copy);
            return ok("");
        }
        if command.starts_with("printf ") {
            let tokens: Vec<&str> = command.split_whitespace().collect();
            let commit = tokens[2];
            let root = tokens[4].trim_end_matches("/.deploy_commit.tmp");
            n.roots.entry(root.to_string()).or_default().marker = Some(commit.to_string());
            return ok("");
        }
        if let Some(rest) = command.strip_prefix("cat ") {
            let path = rest.split_whitespace().next().unwrap_or_default();
            let root = path.trim_end_matches("/.deploy_commit");
            let value = n.roots.get(root).and_then(|r| {
                if command.contains("|| git -C") {
                    r.commit()
                } else {
                    r.marker.clone()
                }
            });
            return match value {
                Some(commit) => ok(&format!("{commit}\n")),
                None => fail("", 1),
            };
        }
        if let Some(rest) = command.strip_prefix("cd ") {
            if let Some((dir, action)) = rest.split_once(" && ") {
                return n.run_in(dir, action, origin, composes);
            }
        }
        fail(&format!("unexpected command: {command}"), 127)
    }
}

/// Shared model of both nodes and the git remote
#[derive(Debug)]
pub struct Cluster {
    state: Mutex<ClusterState>,
}

impl Cluster {
    /// Both nodes live at `live`, origin at `origin`
    pub fn new(live: &str, origin: &str) -> Arc<Self> {
        let mut nodes = HashMap::new();
        nodes.insert(SENTINEL.to_string(), FakeNode::new(live));
        nodes.insert(PRODUCTION.to_string(), FakeNode::new(live));
        Arc::new(Self {
            state: Mutex::new(ClusterState {
                origin: origin.to_string(),
                composes: HashMap::new(),
                nodes,
            }),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    pub fn with_node<R>(&self, node: &str, f: impl FnOnce(&mut FakeNode) -> R) -> R {
        let mut state = self.lock();
        f(state.nodes.get_mut(node).unwrap())
    }

    pub fn root(&self, node: &str, path: &str) -> Option<Root> {
        self.with_node(node, |n| n.roots.get(path).cloned())
    }

    /// Commit a node reports as live
    pub fn live_commit(&self, node: &str) -> Option<String> {
        self.root(node, LIVE).and_then(|r| r.commit())
    }

    /// Commit the live application files came from
    pub fn live_code(&self, node: &str) -> Option<String> {
        self.root(node, LIVE).and_then(|r| r.code)
    }

    /// Turn a node into a direct-mode node: its staging root disappears
    pub fn drop_staging(&self, node: &str) {
        self.with_node(node, |n| {
            n.roots.remove(STAGING);
        });
    }

    pub fn roots(&self, node: &str) -> BTreeMap<String, Root> {
        self.with_node(node, |n| n.roots.clone())
    }

    pub fn commands(&self, node: &str) -> Vec<String> {
        self.with_node(node, |n| n.log.clone())
    }

    fn healthy(&self, node: &str) -> bool {
        self.with_node(node, |n| {
            let code = n.roots.get(LIVE).and_then(|r| r.code.clone()).unwrap_or_default();
            !n.unhealthy_commits.contains(&code)
        })
    }
}

pub struct FakeExecutor {
    cluster: Arc<Cluster>,
    node: String,
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    fn node_name(&self) -> &str {
        &self.node
    }

    fn transport(&self) -> Transport {
        Transport::Direct
    }

    async fn execute(
        &self,
        command: &str,
        _timeout: Option<Duration>,
    ) -> Result<CommandOutput, ConnectivityError> {
        Ok(self.cluster.lock().run(&self.node, command))
    }
}

/// Hands out fake executors and counts how often a node was contacted
pub struct FakeConnector {
    cluster: Arc<Cluster>,
    connects: AtomicUsize,
    unreachable: Mutex<HashSet<String>>,
}

impl FakeConnector {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn set_unreachable(&self, node: &str) {
        self.unreachable.lock().unwrap().insert(node.to_string());
    }
}

impl Connector for FakeConnector {
    fn connect(&self, profile: &NodeProfile) -> Result<SharedExecutor, ConnectivityError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.lock().unwrap().contains(&profile.name) {
            return Err(ConnectivityError::Unreachable {
                node: profile.name.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(Arc::new(FakeExecutor {
            cluster: Arc::clone(&self.cluster),
            node: profile.name.clone(),
        }))
    }
}

type NodeState = (Arc<Cluster>, String);

async fn health(State((cluster, node)): State<NodeState>) -> (StatusCode, &'static str) {
    if cluster.healthy(&node) {
        (StatusCode::OK, r#"{"status":"healthy"}"#)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, r#"{"status":"unhealthy"}"#)
    }
}

async fn reload(State((cluster, node)): State<NodeState>) -> StatusCode {
    cluster.with_node(&node, |n| {
        n.reloads += 1;
        if n.fail_reload {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        }
    })
}

async fn serve_node(cluster: Arc<Cluster>, node: &str) -> String {
    let app = Router::new()
        .route("/health", get(health))
        .route("/api/admin/reload", post(reload))
        .route("/api/ping", get(|| async { "pong" }))
        .with_state((cluster, node.to_string()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Candidate pointing at `commit` on `main`
pub fn candidate(commit: &str) -> ReleaseCandidate {
    ReleaseCandidate {
        commit: commit.to_string(),
        branch: "main".to_string(),
        is_clean: true,
        has_unpushed: false,
    }
}

/// Cluster, connector and a configuration pointing at both fake nodes
pub struct Harness {
    pub cluster: Arc<Cluster>,
    pub connector: Arc<FakeConnector>,
    pub config: DeployConfig,
    _state_dir: tempfile::TempDir,
}

impl Harness {
    /// Nodes live at C1, origin (and the release candidate) at C2
    pub async fn new() -> Self {
        let cluster = Cluster::new(C1, C2);
        let state_dir = tempfile::tempdir().unwrap();

        let profile = |name: &str, url: String| {
            NodeProfile::new(name, "10.0.0.1", LIVE, url).with_staging(STAGING, ROLLBACK)
        };
        let policy = RetryPolicy::fixed(2, Duration::from_millis(20)).with_timeout(Duration::from_secs(2));

        let mut config = DeployConfig::default();
        config.state_dir = state_dir.path().to_path_buf();
        config.validate_command = VALIDATE.to_string();
        config.rebuild_command = REBUILD.to_string();
        config.health = policy;
        config.reload = policy;
        config.regression.command = "run-regression --env {env} {category}".to_string();
        config.regression.env_name = SENTINEL.to_string();
        config.regression.categories = vec!["health".into(), "api".into(), "payment".into()];
        config.nodes.sentinel = profile(SENTINEL, serve_node(Arc::clone(&cluster), SENTINEL).await);
        config.nodes.production = profile(PRODUCTION, serve_node(Arc::clone(&cluster), PRODUCTION).await);

        let connector = Arc::new(FakeConnector {
            cluster: Arc::clone(&cluster),
            connects: AtomicUsize::new(0),
            unreachable: Mutex::new(HashSet::new()),
        });

        Self {
            cluster,
            connector,
            config,
            _state_dir: state_dir,
        }
    }

    /// Pipeline releasing C2
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_for(C2)
    }

    pub fn pipeline_for(&self, commit: &str) -> Pipeline {
        Pipeline::new(
            self.config.clone(),
            self.connector.clone(),
            Box::new(FixedCandidate(candidate(commit))),
        )
    }

    pub fn history(&self) -> History {
        History::from_config(&self.config)
    }
}
