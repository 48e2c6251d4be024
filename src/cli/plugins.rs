use super::CliContext;

pub async fn execute(context: &CliContext) -> anyhow::Result<()> {
    let registry = context.registry();
    for id in registry.ids() {
        let capabilities: Vec<String> = registry
            .capabilities_of(id)
            .unwrap_or_default()
            .iter()
            .map(|c| c.to_string())
            .collect();
        println!("{:<20} {}", id, capabilities.join(", "));
    }
    Ok(())
}
