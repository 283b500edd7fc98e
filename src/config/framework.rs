//! Framework backend settings
//!
//! Each entry describes how to launch one inference-serving framework and
//! how to tell when it is ready. Command lines are templates; see
//! [`expand_placeholders`](super::expand_placeholders).

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A command with arguments and extra environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Program to execute
    #[serde(default)]
    pub command: String,

    /// Argument templates
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables (values are templates too)
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Launch and readiness settings for one framework
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Human-readable name
    #[serde(default)]
    pub label: Option<String>,

    /// Server launch command
    #[serde(flatten)]
    pub launch: CommandConfig,

    /// Host the server answers on (used for health probes)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the server listens on
    pub port: u16,

    /// Path probed for readiness
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Working directory for the launched process
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Model presets: preset name -> framework-specific model id
    #[serde(default)]
    pub models: BTreeMap<String, String>,

    /// Command run once after the server becomes ready (e.g. pulling weights)
    #[serde(default)]
    pub post_ready: Option<CommandConfig>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl FrameworkConfig {
    /// Create a framework entry with default probe settings
    pub fn new(command: impl Into<String>, port: u16) -> Self {
        Self {
            label: None,
            launch: CommandConfig {
                command: command.into(),
                args: Vec::new(),
                env: HashMap::new(),
            },
            host: default_host(),
            port,
            health_path: default_health_path(),
            working_dir: None,
            models: BTreeMap::new(),
            post_ready: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launch.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.launch.env.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    pub fn with_model(mut self, preset: impl Into<String>, id: impl Into<String>) -> Self {
        self.models.insert(preset.into(), id.into());
        self
    }

    pub fn with_post_ready(mut self, hook: CommandConfig) -> Self {
        self.post_ready = Some(hook);
        self
    }

    /// Resolve a model preset to the framework-specific id.
    ///
    /// Names that are not presets pass through unchanged.
    pub fn resolve_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.models.get(model).map(String::as_str).unwrap_or(model)
    }

    /// URL probed for readiness
    pub fn health_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.health_path)
    }
}

/// Built-in framework table (sglang, vllm, ollama)
pub fn default_frameworks() -> BTreeMap<String, FrameworkConfig> {
    let presets = [
        ("gpt-oss-20b", "openai/gpt-oss-20b", "gpt-oss:20b"),
        (
            "llama3.1-8b",
            "meta-llama/Llama-3.1-8B-Instruct",
            "llama3.1:8b",
        ),
    ];

    let mut sglang = FrameworkConfig::new("python", 30000)
        .with_label("SGLang")
        .with_args([
            "-m",
            "sglang.launch_server",
            "--model-path",
            "{model}",
            "--tp",
            "1",
            "--port",
            "{port}",
            "--mem-fraction-static",
            "0.85",
        ]);
    let mut vllm = FrameworkConfig::new("vllm", 8000)
        .with_label("vLLM")
        .with_args([
            "serve",
            "{model}",
            "--host",
            "0.0.0.0",
            "--port",
            "{port}",
            "--gpu-memory-utilization",
            "0.85",
            "--enable-prefix-caching",
        ]);

    let ollama_host: HashMap<String, String> =
        [("OLLAMA_HOST".to_string(), "0.0.0.0:{port}".to_string())].into();
    let mut ollama = FrameworkConfig::new("ollama", 11434)
        .with_label("Ollama")
        .with_args(["serve"])
        .with_env("OLLAMA_HOST", "0.0.0.0:{port}")
        .with_health_path("/api/tags")
        .with_post_ready(CommandConfig {
            command: "ollama".to_string(),
            args: vec!["pull".to_string(), "{model}".to_string()],
            env: ollama_host,
        });

    for (preset, hf_id, ollama_tag) in presets {
        sglang = sglang.with_model(preset, hf_id);
        vllm = vllm.with_model(preset, hf_id);
        ollama = ollama.with_model(preset, ollama_tag);
    }

    BTreeMap::from([
        ("ollama".to_string(), ollama),
        ("sglang".to_string(), sglang),
        ("vllm".to_string(), vllm),
    ])
}
