//! Manual smoke check for the engine worker.
//!
//! Run with: cargo run -p scriptum-js-runtime --example smoke

use scriptum_js_runtime::{spawn_engine, CompileUnit, EngineSettings};
use tokio_util::sync::CancellationToken;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    scriptum_js_runtime::init_platform();

    let engine = spawn_engine("smoke", EngineSettings::default())?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let unit = CompileUnit {
            label: "smoke".to_string(),
            params: vec!["base".to_string()],
            body: r#"
                function add(a, b) { return a + b; }
                console.log("smoke script compiled, host time", host.now());
                return add(base, 2);
            "#
            .to_string(),
        };

        let artifact = engine.compile(unit).await?;
        let result = engine
            .execute(
                artifact,
                vec![serde_json::json!(40)],
                Some(5_000),
                CancellationToken::new(),
            )
            .await?;
        println!("result: {result}");

        let known = engine.discard(artifact).await?;
        println!("discarded: {known}");
        Ok::<(), scriptum_js_runtime::EngineError>(())
    })?;

    engine.terminate();
    engine.join()?;
    Ok(())
}
