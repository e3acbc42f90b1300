use clap::Parser as _;
use pigeonhole::{Flags, Store};
use std::io::{Read as _, Write as _};
use std::path;

#[derive(clap::Parser)]
struct Arguments {
  #[arg(long = "users-root", help = "Directory containing one subdirectory per user")]
  users_root: path::PathBuf,
  #[arg(long = "user", help = "User whose mailboxes to operate on")]
  user: String,

  #[arg(
    long = "log-directory",
    help = "Log directory",
    default_value_t = String::from("$ENV{XDG_RUNTIME_DIR}")
  )]
  log_directory: String,
  #[clap(flatten)]
  verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

  #[clap(subcommand)]
  command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
  /// List mailboxes matching a pattern (IMAP `*`/`%` wildcards).
  List {
    #[arg(long, default_value = "*")]
    pattern: String,
  },
  /// Create a new mailbox.
  Create { name: String },
  /// Delete an empty mailbox.
  Delete { name: String },
  /// Append a message (read from stdin) to a mailbox.
  Append { name: String },
  /// Print the full RFC 822 content of one message.
  Cat { name: String, message_number: u32 },
  /// List UIDs of messages carrying the \Seen flag.
  Seen { name: String },
}

fn run(arguments: &Arguments) -> anyhow::Result<()> {
  let mut store = Store::open(&arguments.users_root, &arguments.user)?;

  match &arguments.command {
    Command::List { pattern } => {
      for name in store.list("", pattern)? {
        println!("{name}");
      }
    }
    Command::Create { name } => store.create(name)?,
    Command::Delete { name } => store.delete(name)?,
    Command::Append { name } => {
      let mut buffer = Vec::new();
      std::io::stdin().read_to_end(&mut buffer)?;
      let mut mailbox = store.open_mailbox(name, false)?;
      let handle = mailbox.append_begin(Flags::empty(), chrono::Utc::now().timestamp_millis())?;
      mailbox.append_append(&handle, &buffer)?;
      let uid = mailbox.append_end(handle)?;
      mailbox.close(false)?;
      log::info!("appended message with uid {uid} to {name}");
    }
    Command::Cat { name, message_number } => {
      let mut mailbox = store.open_mailbox(name, true)?;
      std::io::stdout().write_all(&mailbox.get_content(*message_number)?)?;
    }
    Command::Seen { name } => {
      let mut mailbox = store.open_mailbox(name, true)?;
      for uid in mailbox.search(&[pigeonhole::index::Criterion::HasFlag(Flags::SEEN)])? {
        println!("{uid}");
      }
    }
  }

  store.close()?;
  Ok(())
}

fn main() -> anyhow::Result<()> {
  let arguments = Arguments::parse();

  let encoder = Box::new(log4rs::encode::pattern::PatternEncoder::new("{d(%F %T)} {l} {t} - {m}{n}"));
  log4rs::init_config(
    log4rs::config::Config::builder()
      .appender(
        log4rs::config::Appender::builder()
          .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(log::LevelFilter::Trace)))
          .build(
            "file",
            Box::new(
              log4rs::append::file::FileAppender::builder()
                .encoder(encoder.clone())
                .build(path::Path::new(&arguments.log_directory).join(format!("{}.log", arguments.user)))?,
            ),
          ),
      )
      .appender(
        log4rs::config::Appender::builder()
          .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(arguments.verbose.log_level_filter())))
          .build("console", Box::new(log4rs::append::console::ConsoleAppender::builder().encoder(encoder).build())),
      )
      .build(log4rs::config::Root::builder().appenders(["console", "file"]).build(log::LevelFilter::Trace))?,
  )?;

  run(&arguments)
}
