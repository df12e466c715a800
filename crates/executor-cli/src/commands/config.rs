use executor_core::{Config, Decorator};
use std::path::Path;

const SAMPLE_CONFIG: &str = r#"# Execution substrate executors

executors:
  - name: hp
    type: local
    decorators:
      - kind: cpuset
        path: /hp
      - kind: pid_namespace

  - name: loadgen
    type: ssh
    host: 192.168.0.152
    user: bench
    key_path: ~/.ssh/id_rsa

  - name: k8s
    type: kubernetes
    namespace: default
    image: centos:7
    cpu_request: 1000
    cpu_limit: 2000
    privileged: true
    launch_timeout_secs: 60

defaults:
  output_lines_count: 3
"#;

pub async fn run(path: bool, init: bool) -> anyhow::Result<()> {
    let config_path = Config::default_path();
    if path {
        println!("{}", config_path.display());
    } else if init {
        write_sample(&config_path)?;
    } else {
        show(&config_path)?;
    }
    Ok(())
}

fn write_sample(config_path: &Path) -> anyhow::Result<()> {
    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        println!("Remove it first if you want to reinitialize.");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(config_path, SAMPLE_CONFIG)?;
    println!("Sample config written to: {}", config_path.display());
    Ok(())
}

fn show(config_path: &Path) -> anyhow::Result<()> {
    println!("Config path: {}", config_path.display());
    if !config_path.exists() {
        println!("Status:      not found");
        println!("Run `substrate config --init` to create one.");
        return Ok(());
    }

    let config = Config::load_from(config_path)?;
    println!("Executors:   {}", config.executors.len());
    for e in &config.executors {
        let decorated = e.decorators().decorate("<command>");
        println!("  - {} ({}): {}", e.name, e.executor_type, decorated);
    }
    Ok(())
}
