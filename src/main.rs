use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use jenkins_on_ecs::environment::{self, DeployEnvironment};
use jenkins_on_ecs::{app, config, outputs, template, writer};

#[derive(Parser, Debug)]
#[command(
    name = "jenkins-on-ecs",
    version,
    about = "Synthesize CloudFormation stacks for Jenkins on ECS"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write one CloudFormation template per stack plus a manifest.
    Synth {
        /// YAML settings file; defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "cdk.out")]
        out: PathBuf,

        #[arg(long, env = environment::ACCOUNT_VAR)]
        account: Option<String>,

        #[arg(long, env = environment::REGION_VAR)]
        region: Option<String>,
    },

    /// Fetch the outputs of the deployed stacks into outputs.json and outputs.d.ts.
    Outputs {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, env = environment::REGION_VAR)]
        region: Option<String>,

        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),

    #[error(transparent)]
    Template(#[from] template::Error),

    #[error(transparent)]
    Writer(#[from] writer::Error),

    #[error(transparent)]
    Outputs(#[from] outputs::Error),
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Synth {
            config,
            out,
            account,
            region,
        } => {
            let settings = config::load(config.as_deref())?;
            let env = DeployEnvironment::new(account, region)
                .or(settings.environment.clone())
                .with_default_region()
                .await;

            let assembly = app::synthesize(&settings, &env)?;
            for path in writer::write_assembly(&out, &assembly)? {
                println!("{}", path.display());
            }
        }
        Command::Outputs {
            config,
            region,
            out,
        } => {
            let settings = config::load(config.as_deref())?;
            let env = DeployEnvironment::new(None, region).or(settings.environment.clone());
            let client = outputs::client(env.region).await?;
            let stack_outputs = outputs::fetch_all(&client, &app::stack_names(&settings)).await?;
            for path in writer::write_outputs(&out, &stack_outputs)? {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}
