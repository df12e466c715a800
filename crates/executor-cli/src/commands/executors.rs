use executor_core::config::{Config, ExecutorConfig, ExecutorType};

fn target(e: &ExecutorConfig) -> String {
    match e.executor_type {
        ExecutorType::Local => "127.0.0.1".to_string(),
        ExecutorType::Ssh => format!(
            "{}:{}",
            e.host.as_deref().unwrap_or("-"),
            e.ssh_port()
        ),
        ExecutorType::Kubernetes => format!(
            "{}/{}",
            e.namespace.as_deref().unwrap_or("default"),
            e.image.as_deref().unwrap_or("-")
        ),
    }
}

pub async fn run(config: &Config, json: bool) -> anyhow::Result<()> {
    if config.executors.is_empty() {
        println!("No executors configured.");
        println!("Run `substrate config --init` to create a sample config.");
        return Ok(());
    }

    if json {
        let entries: Vec<serde_json::Value> = config
            .executors
            .iter()
            .map(|e| {
                serde_json::json!({
                    "name": e.name,
                    "type": e.executor_type.to_string(),
                    "target": target(e),
                    "decorators": e.decorators,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        println!("{:<15} {:<12} {:<30} {}", "NAME", "TYPE", "TARGET", "DECORATORS");
        println!("{}", "-".repeat(70));
        for e in &config.executors {
            println!(
                "{:<15} {:<12} {:<30} {}",
                e.name,
                e.executor_type,
                target(e),
                e.decorators.len(),
            );
        }
    }

    Ok(())
}
