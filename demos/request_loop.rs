use std::sync::Arc;
use std::time::Duration;
use txn_metrics_agent::{
    setup_logging, Agent, AgentConfig, ChannelSink, ExitOptions, LogConfig, TransactionContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = AgentConfig::default();
    config.worker.period = Duration::from_secs(1);
    setup_logging(LogConfig::from_agent_config(&config)).map_err(anyhow::Error::msg)?;

    let (sink, mut reports) = ChannelSink::new(64);
    let agent = Agent::builder()
        .with_config(config)
        .with_sink(Arc::new(sink))
        .build()?;
    if let Err(e) = agent.start() {
        if !e.is_recoverable() {
            return Err(e.into());
        }
        tracing::warn!(error = %e, "Agent not started, reporting once at exit");
    }

    let store = agent.store().clone();
    let requests = tokio::spawn(async move {
        for i in 0..20u64 {
            let mut txn = TransactionContext::new();
            let mut request = store.frame(&mut txn, "Controller/users/show");
            request.set_uri(format!("/users/{i}"));
            {
                let _query = store.frame(&mut request, "ActiveRecord/User/find");
                std::thread::sleep(Duration::from_millis(5 + i % 7));
            }
            store.instrument(&mut request, "View/users/show", |_| {
                std::thread::sleep(Duration::from_millis(3));
            });
            drop(request);

            let mut job = TransactionContext::new();
            let token = store.enter(&mut job, "Controller/reports/create");
            store.exit(&mut job, token, ExitOptions::default());

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });

    requests.await?;
    if agent.is_started() {
        agent.shutdown().await?;
    } else {
        agent.run_once().await?;
    }

    while let Ok(report) = reports.try_recv() {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
