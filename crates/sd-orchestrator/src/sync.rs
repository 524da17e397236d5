//! Code synchronization: bring a node checkout to the tip of a branch

use sd_core::shell::quote;
use sd_core::DeployError;

use crate::node::Node;

/// Fetch and fast-forward `dir` to `origin/<branch>`; returns the checked-out commit.
///
/// A failed fast-forward, or tracked files that still differ from HEAD after
/// it, fall back to `git reset --hard origin/<branch>`, discarding local
/// changes on the node. Running it again with no new remote commits leaves
/// the checkout where it is.
pub async fn sync_node(node: &Node, dir: &str, branch: &str) -> Result<String, DeployError> {
    let cd = format!("cd {}", quote(dir));
    let branch_q = quote(branch);

    let fetch = node
        .run(&format!("{cd} && git fetch origin {branch_q}"))
        .await?;
    if !fetch.success() {
        return Err(sync_error(node, format!("git fetch failed: {}", fetch.failure_summary())));
    }

    let pull = node
        .run(&format!("{cd} && git pull --ff-only origin {branch_q}"))
        .await?;
    let needs_reset = if !pull.success() {
        tracing::warn!(
            "{}: fast-forward failed in {} ({}), resetting to origin/{}",
            node.name(),
            dir,
            pull.failure_summary(),
            branch
        );
        true
    } else {
        // A pull that is "already up to date" keeps edited tracked files.
        let diff = node.run(&format!("{cd} && git diff --quiet HEAD")).await?;
        if !diff.success() {
            tracing::warn!(
                "{}: tracked files in {} differ from HEAD, resetting to origin/{}",
                node.name(),
                dir,
                branch
            );
        }
        !diff.success()
    };
    if needs_reset {
        let reset = node
            .run(&format!(
                "{cd} && git reset --hard {}",
                quote(&format!("origin/{branch}"))
            ))
            .await?;
        if !reset.success() {
            return Err(sync_error(
                node,
                format!("git reset --hard failed: {}", reset.failure_summary()),
            ));
        }
    }

    head_commit(node, dir).await
}

/// `git rev-parse HEAD` in `dir`
pub async fn head_commit(node: &Node, dir: &str) -> Result<String, DeployError> {
    let output = node
        .run(&format!("cd {} && git rev-parse HEAD", quote(dir)))
        .await?;
    let commit = output.stdout_trimmed();
    if !output.success() || commit.is_empty() {
        return Err(sync_error(
            node,
            format!("cannot read HEAD in {}: {}", dir, output.failure_summary()),
        ));
    }
    Ok(commit.to_string())
}

/// Tip of `origin/<branch>` as the node sees it, without touching any checkout
pub async fn remote_tip(node: &Node, dir: &str, branch: &str) -> Result<String, DeployError> {
    let output = node
        .run(&format!(
            "cd {} && git ls-remote origin {}",
            quote(dir),
            quote(&format!("refs/heads/{branch}"))
        ))
        .await?;

    output
        .stdout
        .lines()
        .find_map(|line| line.split_whitespace().next())
        .filter(|_| output.success())
        .map(String::from)
        .ok_or_else(|| {
            sync_error(
                node,
                format!("branch {} not found on origin: {}", branch, output.failure_summary()),
            )
        })
}

/// Compare a synced commit with the release candidate
pub fn check_commit(node: &Node, synced: &str, expected: &str) -> Result<(), DeployError> {
    if synced == expected {
        Ok(())
    } else {
        Err(sync_error(
            node,
            format!(
                "node is at {} but the release candidate is {}",
                sd_core::types::short_commit(synced),
                sd_core::types::short_commit(expected)
            ),
        ))
    }
}

fn sync_error(node: &Node, message: String) -> DeployError {
    DeployError::Sync {
        node: node.name().to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sd_core::config::NodeProfile;
    use sd_core::NodeRole;
    use sd_remote::LocalExecutor;
    use std::path::Path;
    use std::process::Command;
    use std::sync::Arc;

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "t")
            .env("GIT_AUTHOR_EMAIL", "t@example.com")
            .env("GIT_COMMITTER_NAME", "t")
            .env("GIT_COMMITTER_EMAIL", "t@example.com")
            .output()
            .unwrap();
        assert!(output.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&output.stderr));
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    /// origin (bare) + an upstream work tree + a node clone
    fn fixture(root: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let origin = root.join("origin.git");
        let upstream = root.join("upstream");
        let node = root.join("node");
        std::fs::create_dir_all(&upstream).unwrap();
        git(root, &["init", "-q", "--bare", "-b", "main", origin.to_str().unwrap()]);
        git(&upstream, &["init", "-q", "-b", "main"]);
        std::fs::write(upstream.join("app.py"), "print('v1')\n").unwrap();
        git(&upstream, &["add", "."]);
        git(&upstream, &["commit", "-q", "-m", "v1"]);
        git(&upstream, &["remote", "add", "origin", origin.to_str().unwrap()]);
        git(&upstream, &["push", "-q", "origin", "main"]);
        git(root, &["clone", "-q", origin.to_str().unwrap(), node.to_str().unwrap()]);
        (upstream, node)
    }

    async fn local_node(dir: &Path) -> Node {
        let profile = NodeProfile::new("node2", "local", dir.to_string_lossy(), "http://127.0.0.1:1");
        Node::open(NodeRole::Sentinel, profile, Arc::new(LocalExecutor::new("node2")), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sync_fast_forwards_and_is_idempotent() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let (upstream, node_dir) = fixture(tmp.path());
        std::fs::write(upstream.join("app.py"), "print('v2')\n").unwrap();
        git(&upstream, &["commit", "-q", "-am", "v2"]);
        git(&upstream, &["push", "-q", "origin", "main"]);
        let tip = git(&upstream, &["rev-parse", "HEAD"]);

        let node = local_node(&node_dir).await;
        let dir = node_dir.to_string_lossy().to_string();
        assert_eq!(remote_tip(&node, &dir, "main").await.unwrap(), tip);

        let first = sync_node(&node, &dir, "main").await.unwrap();
        let second = sync_node(&node, &dir, "main").await.unwrap();
        assert_eq!(first, tip);
        assert_eq!(second, tip);
    }

    #[tokio::test]
    async fn test_diverged_checkout_is_reset() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let (upstream, node_dir) = fixture(tmp.path());

        // Local commit on the node that origin never sees
        std::fs::write(node_dir.join("app.py"), "print('hotfix')\n").unwrap();
        git(&node_dir, &["commit", "-q", "-am", "local hotfix"]);
        std::fs::write(upstream.join("app.py"), "print('v2')\n").unwrap();
        git(&upstream, &["commit", "-q", "-am", "v2"]);
        git(&upstream, &["push", "-q", "origin", "main"]);
        let tip = git(&upstream, &["rev-parse", "HEAD"]);

        let node = local_node(&node_dir).await;
        let synced = sync_node(&node, &node_dir.to_string_lossy(), "main").await.unwrap();
        assert_eq!(synced, tip);
        assert_eq!(
            std::fs::read_to_string(node_dir.join("app.py")).unwrap(),
            "print('v2')\n"
        );
    }

    #[tokio::test]
    async fn test_edited_checkout_at_tip_is_restored() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let (upstream, node_dir) = fixture(tmp.path());
        let tip = git(&upstream, &["rev-parse", "HEAD"]);

        // HEAD already at the tip, tracked file holding other content
        std::fs::write(node_dir.join("app.py"), "print('old')\n").unwrap();

        let node = local_node(&node_dir).await;
        let synced = sync_node(&node, &node_dir.to_string_lossy(), "main").await.unwrap();
        assert_eq!(synced, tip);
        assert_eq!(
            std::fs::read_to_string(node_dir.join("app.py")).unwrap(),
            "print('v1')\n"
        );
    }

    #[tokio::test]
    async fn test_unknown_branch_is_sync_error() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let (_, node_dir) = fixture(tmp.path());
        let node = local_node(&node_dir).await;
        let dir = node_dir.to_string_lossy().to_string();

        assert!(matches!(
            sync_node(&node, &dir, "nope").await,
            Err(DeployError::Sync { .. })
        ));
        assert!(matches!(
            remote_tip(&node, &dir, "nope").await,
            Err(DeployError::Sync { .. })
        ));
    }
}
