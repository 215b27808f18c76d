use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use podshell::{
    cli::{Cli, Commands},
    config::Config,
    init_logging,
    render::TerminalSink,
    session::{ContainerSelection, SessionController},
    transport::{MockTransport, demo},
    ui,
};

/// Transport for pod commands. Only the loopback demo is built in.
fn pod_transport(use_demo: bool, pod: &str, namespace: &str) -> Result<MockTransport> {
    if !use_demo {
        anyhow::bail!(
            "No cluster transport is available in this build; rerun with --demo to use the loopback shell"
        );
    }
    Ok(demo::loopback_transport(pod, namespace))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load configuration
    let config = Config::load_or_default(&cli.config_file);

    // Initialize logging
    let _log_guard = init_logging(&cli.effective_log_level(), &config.log)?;

    tracing::info!("PodShell starting...");
    tracing::debug!("CLI arguments: {:?}", cli);

    match cli.command {
        Commands::Shell {
            pod,
            namespace,
            container,
            shell,
            timeout_ms,
        } => {
            let namespace = namespace.unwrap_or_else(|| config.default_namespace.clone());
            let transport = Arc::new(pod_transport(cli.demo, &pod, &namespace)?);

            let mut selection = ContainerSelection::discover(transport.as_ref(), &pod, &namespace).await?;
            if let Some(container) = container {
                selection.select(&container)?;
            }

            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.connect_timeout());
            let sink = Arc::new(TerminalSink::new(config.terminal.enable_colors));
            let mut shells = config.shell.clone();
            if shell.is_some() {
                shells.preferred = shell;
            }
            let mut controller = SessionController::new(transport.clone(), sink)
                .with_shell_candidates(shells.ordered());

            let target = selection.target();
            eprintln!("{} {}", "Connecting to".cyan(), target);

            match controller.connect_and_wait(target, timeout).await {
                Ok(session_id) => {
                    tracing::info!(
                        "Interactive session {} started with shell {:?}",
                        session_id,
                        transport.shell_of(session_id.as_str())
                    );
                    ui::run_interactive(&mut controller, config.terminal.escape_key).await?;
                    eprintln!("\r\n{}", "Session ended".dimmed());
                    tracing::info!("Session statistics: {:?}", controller.stats());
                }
                Err(e) => {
                    controller.close();
                    eprintln!("{} {}", "Error:".red().bold(), e);
                    return Err(e.into());
                }
            }
        }
        Commands::Containers { pod, namespace } => {
            let namespace = namespace.unwrap_or_else(|| config.default_namespace.clone());
            let transport = pod_transport(cli.demo, &pod, &namespace)?;
            let selection = ContainerSelection::discover(&transport, &pod, &namespace).await?;

            println!("Containers in {}/{}:", namespace, pod);
            for (i, container) in selection.containers().iter().enumerate() {
                if container == selection.default_container() {
                    println!("   {}. {} {}", i + 1, container, "(default)".green());
                } else {
                    println!("   {}. {}", i + 1, container);
                }
            }
        }
        Commands::Config { action } => {
            Config::handle_command(&action, &cli.config_file)?;
        }
    }

    Ok(())
}
