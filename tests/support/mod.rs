// ABOUTME: Test support utilities.
// ABOUTME: Local-transport workspaces, scripted health probes and plan helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use stagehand::config::Config;
use stagehand::deploy::{
    CancelToken, DeploymentReport, Probe, ProbeResponse, Sequencer, SequencerOptions, StateStore,
};
use stagehand::diagnostics::Diagnostics;
use stagehand::plan::{DeploymentPlan, PlanFile};
use stagehand::transport::TransportPool;
use stagehand::types::EnvironmentName;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("stagehand=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// A throwaway project: local build dir, a fake remote host dir, and local state.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("build")).unwrap();
        std::fs::create_dir_all(dir.path().join("remote")).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Stand-in for the target host's filesystem.
    pub fn remote(&self, rel: &str) -> PathBuf {
        self.dir.path().join("remote").join(rel)
    }

    pub fn remote_str(&self, rel: &str) -> String {
        self.remote(rel).to_str().unwrap().to_string()
    }

    pub fn local_state(&self) -> PathBuf {
        self.dir.path().join("local-state")
    }

    pub fn store(&self) -> StateStore {
        StateStore::open(self.local_state()).unwrap()
    }

    /// Write a local build artifact and return its path.
    pub fn artifact(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join("build").join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Write a file on the "remote" side.
    pub fn seed_remote(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.remote(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn read_remote(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.remote(rel)).ok()
    }

    /// Config YAML with local-transport services in the `dev` environment.
    pub fn config_yaml(&self, services: &[&str]) -> String {
        let mut yaml = format!(
            "state_dir: {}\nenvironments:\n  dev:\n",
            self.local_state().display()
        );
        for service in services {
            yaml.push_str(&format!(
                "    {service}:\n      transport: local\n      base_url: http://{service}.test\n      state_dir: {}\n",
                self.remote_str(&format!("state/{service}"))
            ));
        }
        yaml
    }

    pub fn config(&self, services: &[&str]) -> Config {
        let mut config = Config::from_yaml(&self.config_yaml(services)).unwrap();
        config.base_dir = self.path().to_path_buf();
        config
    }

    pub fn plan(&self, yaml: &str) -> DeploymentPlan {
        DeploymentPlan::new(dev(), PlanFile::from_yaml(yaml).unwrap())
    }
}

pub fn dev() -> EnvironmentName {
    EnvironmentName::new("dev").unwrap()
}

/// Health endpoints answering from a URL -> status script. Each call consumes
/// the next status; the last one repeats. Unknown URLs get 503.
#[derive(Default)]
pub struct ScriptedProbe {
    statuses: Mutex<HashMap<String, VecDeque<u16>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn healthy(self: &Arc<Self>, url: &str) -> Arc<Self> {
        self.sequence(url, &[200])
    }

    pub fn status(self: &Arc<Self>, url: &str, status: u16) -> Arc<Self> {
        self.sequence(url, &[status])
    }

    /// Answer `url` with `statuses` in order, then keep repeating the last.
    pub fn sequence(self: &Arc<Self>, url: &str, statuses: &[u16]) -> Arc<Self> {
        self.statuses
            .lock()
            .insert(url.to_string(), statuses.iter().copied().collect());
        Arc::clone(self)
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self, url: &str, _timeout: Duration) -> Result<ProbeResponse, String> {
        self.calls.lock().push(url.to_string());
        let status = match self.statuses.lock().get_mut(url) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or(503),
            Some(script) => script.front().copied().unwrap_or(503),
            None => 503,
        };
        Ok(ProbeResponse {
            status,
            body: if status == 200 { "UP".to_string() } else { String::new() },
        })
    }
}

/// Run `plan` through a sequencer with local transports.
pub async fn run_plan(
    ws: &Workspace,
    config: &Config,
    plan: &DeploymentPlan,
    probe: Arc<dyn Probe>,
    cancel: CancelToken,
) -> (DeploymentReport, Diagnostics) {
    run_plan_with(ws, config, plan, probe, cancel, SequencerOptions::default()).await
}

pub async fn run_plan_with(
    ws: &Workspace,
    config: &Config,
    plan: &DeploymentPlan,
    probe: Arc<dyn Probe>,
    cancel: CancelToken,
    options: SequencerOptions,
) -> (DeploymentReport, Diagnostics) {
    let mut diag = Diagnostics::default();
    let report = Sequencer::new(config, ws.store(), probe, Arc::new(TransportPool::default()), cancel)
        .with_options(options)
        .run(plan, &mut diag)
        .await
        .unwrap();
    (report, diag)
}
