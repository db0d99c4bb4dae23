//! fanuc-web - command line access to a FANUC controller's web server
//!
//! Thin wrapper around the `fanuc_web` library: reset, read system variables,
//! read and write IO, select programs and print a controller summary.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fanuc_web::{
    Controller, ControllerConfig, Credentials, IoKind, Realm, ResourceDescriptor, Value, ValueType,
};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "fanuc-web")]
#[command(about = "Access a FANUC controller through its web server, KCL and Karel helpers")]
#[command(version)]
struct Args {
    /// Controller host name or address (overrides the configuration file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Path to a controller configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<f64>,

    /// Username for the KCL, Karel and file realms
    #[arg(long, global = true)]
    user: Option<String>,

    /// Password for the KCL, Karel and file realms
    #[arg(long, global = true, requires = "user")]
    password: Option<String>,

    /// Assume the helper pages are already on the controller
    #[arg(long, global = true)]
    no_upload: bool,

    /// Output format: text, json
    #[arg(long, default_value = "text", global = true)]
    format: String,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset the controller
    Reset {
        /// Verify the controller is no longer faulted; exit status reflects the result
        #[arg(long)]
        verify: bool,
    },
    /// Print the value of a system variable
    Get {
        /// Variable name, e.g. '$FNO' or '$MCR.$GENOVERRIDE'
        variable: String,
    },
    /// Read an IO port
    Read {
        /// Port type, e.g. DOUT, RDI, UOPOUT, GIN
        port: String,
        index: u32,
        /// Exit with status 1 if the port is ON, 0 if OFF (boolean ports only)
        #[arg(long)]
        status: bool,
    },
    /// Write an IO port
    Write {
        port: String,
        index: u32,
        /// ON/OFF/1/0 for boolean ports, a number for analog and group ports
        value: String,
        /// Verify the write; exit status reflects the result
        #[arg(long)]
        check: bool,
    },
    /// Select a program on the TP
    Select {
        program: String,
    },
    /// Print a summary of the controller's identity and state
    Info,
}

fn load_config(args: &Args) -> Result<ControllerConfig> {
    let mut config = match (&args.config, &args.host) {
        (Some(path), _) => ControllerConfig::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        (None, Some(host)) => ControllerConfig::new(host.clone()),
        (None, None) => bail!("Either --host or --config is required"),
    };
    if let (Some(_), Some(host)) = (&args.config, &args.host) {
        config.controller.host = host.clone();
    }
    if let Some(timeout) = args.timeout {
        let timeout = Duration::try_from_secs_f64(timeout)
            .ok()
            .filter(|t| !t.is_zero())
            .context("--timeout must be a positive number of seconds")?;
        config = config.with_request_timeout(timeout);
    }
    if let Some(user) = &args.user {
        let credentials = Credentials::new(user.clone(), args.password.clone().unwrap_or_default());
        for realm in [Realm::Kcl, Realm::Karel, Realm::File] {
            config = config.with_credentials(realm, credentials.clone());
        }
    }
    // a plain reset does not read anything through the helper pages
    let needs_helpers = !matches!(args.command, Commands::Reset { verify: false });
    if args.no_upload || !needs_helpers {
        config.controller.skip_helper_upload = Some(true);
    }
    config.validate()?;
    Ok(config)
}

fn print_value(args: &Args, value: &Value) -> Result<()> {
    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", value);
    }
    Ok(())
}

fn parse_port_value(kind: IoKind, literal: &str) -> Result<Value> {
    match kind.value_type() {
        ValueType::Boolean => match literal.trim().to_ascii_uppercase().as_str() {
            "ON" | "TRUE" | "1" => Ok(Value::Bool(true)),
            "OFF" | "FALSE" | "0" => Ok(Value::Bool(false)),
            _ => bail!("'{}' is not a valid value for a {} port", literal, kind),
        },
        _ => {
            let level = literal
                .trim()
                .parse::<i64>()
                .with_context(|| format!("'{}' is not a valid value for a {} port", literal, kind))?;
            Ok(Value::Int(level))
        }
    }
}

async fn run(args: &Args, controller: &Controller) -> Result<ExitCode> {
    match &args.command {
        Commands::Reset { verify } => {
            let confidence = controller.reset().await.context("Reset failed")?;
            debug!("Reset sent ({:?})", confidence);
            if *verify {
                let faulted = controller.is_faulted().await.context("Could not read fault state")?;
                if faulted {
                    eprintln!("Controller is still faulted");
                    return Ok(ExitCode::from(1));
                }
                info!("Controller reset");
            }
        }
        Commands::Get { variable } => {
            let descriptor = ResourceDescriptor::sysvar(variable)?;
            let value = controller
                .read(&descriptor)
                .await
                .with_context(|| format!("Could not read {}", variable))?;
            print_value(args, &value)?;
        }
        Commands::Read { port, index, status } => {
            let kind: IoKind = port.parse()?;
            let descriptor = ResourceDescriptor::io(kind, *index)?;
            let value = controller
                .read(&descriptor)
                .await
                .with_context(|| format!("Could not read {}", descriptor))?;
            if *status {
                let Some(on) = value.as_bool() else {
                    bail!("--status is only supported for boolean ports");
                };
                return Ok(ExitCode::from(u8::from(on)));
            }
            match value {
                Value::Bool(on) if args.format != "json" => println!("{}", u8::from(on)),
                other => print_value(args, &other)?,
            }
        }
        Commands::Write { port, index, value, check } => {
            let kind: IoKind = port.parse()?;
            let value = parse_port_value(kind, value)?;
            if *check {
                let verified = controller
                    .io_write_checked(kind, *index, &value)
                    .await
                    .with_context(|| format!("Could not write {}[{}]", kind, index))?;
                if !verified {
                    eprintln!("Write of {}[{}] could not be verified", kind, index);
                    return Ok(ExitCode::from(1));
                }
            } else {
                let descriptor = ResourceDescriptor::io(kind, *index)?;
                let confidence = controller
                    .write(&descriptor, value)
                    .await
                    .with_context(|| format!("Could not write {}", descriptor))?;
                debug!("Wrote {} ({:?})", descriptor, confidence);
            }
        }
        Commands::Select { program } => {
            controller
                .write(&ResourceDescriptor::program(), Value::Text(program.clone()))
                .await
                .with_context(|| format!("Could not select {}", program))?;
            info!("Selected {}", program);
        }
        Commands::Info => {
            let info = controller.info().await.context("Could not collect controller info")?;
            if args.format == "json" {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("Series:           {}", info.series);
                println!("Application:      {}", info.application);
                println!("Software version: {}", info.software_version);
                println!("Clock:            {}", info.clock);
                println!("General override: {}%", info.general_override);
                println!("Motion groups:    {}", info.num_groups);
                println!("Active program:   {}", info.active_program);
                println!("TP enabled:       {}", info.tp_enabled);
                println!("Faulted:          {}", info.faulted);
                println!("E-stopped:        {}", info.e_stopped);
                println!("Remote:           {}", info.remote);
                println!("Program running:  {}", info.program_running);
                println!("Program paused:   {}", info.program_paused);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let filter = if args.verbose {
        "fanuc_web=debug"
    } else {
        "fanuc_web=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !matches!(args.format.as_str(), "text" | "json") {
        bail!("Unknown output format '{}' (expected text or json)", args.format);
    }

    let config = load_config(&args)?;
    info!("Using controller {}", config.endpoint());
    let controller = Controller::open(config)
        .await
        .context("Failed to connect to controller")?;

    run(&args, &controller).await
}
