//! Regression gate
//!
//! Runs the categorized regression harness against the sentinel, one harness
//! invocation per category. The exit status of each invocation is its verdict.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use sd_core::config::{DeployConfig, RegressionMode};
use sd_core::shell::quote;
use sd_core::traits::SharedExecutor;
use sd_core::{DeployError, GateDecision};
use sd_remote::LocalExecutor;

use crate::node::Node;

/// Verdict for one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub category: String,
    pub passed: bool,
    pub summary: String,
}

/// Verdicts for every requested category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegressionReport {
    pub node: String,
    pub results: Vec<CategoryResult>,
}

impl RegressionReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failed_categories(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.category.clone())
            .collect()
    }

    pub fn decision(&self) -> GateDecision {
        let subject = format!("{} regression", self.node);
        if self.passed() {
            GateDecision::pass(subject, format!("{} categories passed", self.results.len()))
        } else {
            GateDecision::fail(subject, format!("failed: {}", self.failed_categories().join(", ")))
        }
    }

    /// The gate error for a failed report
    pub fn into_error(self) -> Option<DeployError> {
        (!self.passed()).then(|| DeployError::RegressionTest {
            failed: self.failed_categories(),
            node: self.node,
        })
    }
}

/// Substitute `{env}` and `{category}` in the harness command template.
///
/// `{categories}` is accepted as an alias since the harness is invoked once
/// per category.
pub fn render_command(template: &str, env: &str, category: &str) -> String {
    let category = quote(category);
    template
        .replace("{env}", &quote(env))
        .replace("{categories}", &category)
        .replace("{category}", &category)
}

/// Run the regression harness for `categories` against `node`
pub async fn regression_test(
    node: &Node,
    config: &DeployConfig,
    categories: &[String],
    parallel: bool,
) -> RegressionReport {
    let settings = &config.regression;
    let (executor, workdir): (SharedExecutor, String) = match settings.mode {
        RegressionMode::Remote => (Arc::clone(node.executor()), node.live_root().to_string()),
        RegressionMode::Local => (
            Arc::new(LocalExecutor::new("orchestrator")),
            config.repo_path.to_string_lossy().to_string(),
        ),
    };

    tracing::info!(
        "{}: running {} regression categor{} ({}, {})",
        node.name(),
        categories.len(),
        if categories.len() == 1 { "y" } else { "ies" },
        if parallel { "parallel" } else { "sequential" },
        match settings.mode {
            RegressionMode::Remote => "on node",
            RegressionMode::Local => "from orchestrator",
        }
    );

    let run = |category: String| {
        let executor = Arc::clone(&executor);
        let command = format!(
            "cd {} && {}",
            quote(&workdir),
            render_command(&settings.command, &settings.env_name, &category)
        );
        let timeout = settings.timeout;
        async move { run_category(executor, category, command, timeout).await }
    };

    let results = if parallel {
        join_all(categories.iter().cloned().map(run)).await
    } else {
        let mut results = Vec::with_capacity(categories.len());
        for category in categories.iter().cloned() {
            results.push(run(category).await);
        }
        results
    };

    RegressionReport {
        node: node.name().to_string(),
        results,
    }
}

async fn run_category(
    executor: SharedExecutor,
    category: String,
    command: String,
    timeout: Option<std::time::Duration>,
) -> CategoryResult {
    match executor.execute(&command, timeout).await {
        Ok(output) if output.success() => {
            tracing::info!("  ✓ {}", category);
            CategoryResult {
                category,
                passed: true,
                summary: String::new(),
            }
        }
        Ok(output) => {
            let summary = output.failure_summary();
            tracing::warn!("  ✗ {}: {}", category, summary);
            CategoryResult {
                category,
                passed: false,
                summary,
            }
        }
        Err(e) => {
            tracing::warn!("  ✗ {}: {}", category, e);
            CategoryResult {
                category,
                passed: false,
                summary: e.to_string(),
            }
        }
    }
}
