use tokio::io::{AsyncBufReadExt, BufReader};

use viva_coach::app_composite::AppComposite;
use viva_coach::config;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize rustls crypto provider, for secure connections
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .unwrap();

    let config = config::from_env()?;

    let mut app = AppComposite::new(&config)?;

    {
        let logger = app.logger.lock().unwrap();
        logger.info("Starting your speaking practice session.");
        logger.info("The examiner speaks first; answer out loud, and pause when you are done.");
        logger.info("Press Enter at any time to end the session and receive your evaluation.");
    }

    let control = app.orchestrator.control();
    tokio::spawn(async move {
        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        let _ = stdin.read_line(&mut line).await;
        control.stop();
    });

    let report = app.orchestrator.run_session().await?;

    let logger = app.logger.lock().unwrap();
    logger.info("");
    logger.info("=== Evaluation ===");
    if report.is_empty() {
        logger.info("No analysis result available.");
    } else {
        logger.info(&report.to_string());
    }

    Ok(())
}
