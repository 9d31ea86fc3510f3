use clap::{command, Parser};
use push_bridge::{
    config::ConfigFile,
    dispatch::DispatchOutcome,
    platform::loopback::{LoopbackPlatform, RegistrationOutcome},
    script::{native::NativeRuntime, ScriptRuntime, ScriptValue},
    Error, PushExtension,
};
use std::{path::PathBuf, rc::Rc, thread, time::Duration};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the host config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Push message (JSON) to deliver from a platform thread; repeatable
    #[arg(short, long)]
    message: Vec<String>,

    /// Make the platform fail registration with this error text
    #[arg(long)]
    fail_registration: Option<String>,

    /// Delay before the platform answers the registration request
    #[arg(long, default_value_t = 100)]
    delay_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: &Cli) -> Result<(), Error> {
    let config = if cli.config.exists() {
        ConfigFile::from_file(&cli.config)?
    } else {
        debug!("config file {:?} not found, using defaults", cli.config);
        ConfigFile::new()
    };

    let outcome = match &cli.fail_registration {
        Some(error) => RegistrationOutcome::Fail(error.clone()),
        None => RegistrationOutcome::Generated,
    };
    let platform = LoopbackPlatform::new(outcome).with_delay(Duration::from_millis(cli.delay_ms));
    let handle = platform.handle();

    let mut extension = PushExtension::app_initialize(&config, platform)?;
    info!("sender id: {:?}", extension.config().sender_id);

    let native = Rc::new(NativeRuntime::new());
    native.set_current_instance(Some(native.spawn_instance()));
    let runtime: Rc<dyn ScriptRuntime> = native.clone();
    let push = extension.initialize(&runtime);

    let on_registered = native.create_callback(|_, args| {
        match args {
            [ScriptValue::String(id), ScriptValue::Nil] => println!("registered: {}", id),
            [ScriptValue::Nil, error] => println!(
                "registration failed: {}",
                error.get("error").and_then(ScriptValue::as_str).unwrap_or("?")
            ),
            other => println!("unexpected registration result: {:?}", other),
        }
        Ok(())
    });
    let on_message = native.create_callback(|_, args| {
        println!("message: {:?}", args.first().unwrap_or(&ScriptValue::Nil));
        Ok(())
    });

    push.set_listener(on_message)?;
    push.register(&ScriptValue::Nil, on_registered)?;

    let messages = cli.message.clone();
    let expected = 1 + messages.len();
    let injector = thread::spawn(move || {
        for message in messages {
            if let Err(e) = handle.deliver_message(&message) {
                warn!("could not deliver message: {}", e);
            }
        }
    });

    let mut handled = 0;
    while handled < expected {
        tokio::select! {
            outcome = extension.next_event() => match outcome {
                Some(DispatchOutcome::Delivered) => handled += 1,
                Some(other) => {
                    warn!("event not delivered: {:?}", other);
                    handled += 1;
                }
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|e| Error::internal(format!("Failed to wait for Ctrl+C: {}", e)))?;
                println!("Shutdown signal received");
                break;
            }
        }
    }

    if injector.join().is_err() {
        warn!("message injector thread panicked");
    }

    extension.finalize(runtime.context_id());
    extension.app_finalize()?;
    println!("Push bridge shut down after {} event(s).", handled);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
