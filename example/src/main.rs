use anyhow::{Context, bail};
use keylock::{Driver, FileDriver, Lock, MemoryDriver};
use log::info;
use std::env;
use std::path::PathBuf;
use std::sync::mpsc::channel;
use std::time::Duration;

/// Settings read from `KEYLOCK_*` environment variables.
#[derive(Debug)]
struct Config {
    backend: String,
    key: String,
    dir: PathBuf,
    #[cfg_attr(not(feature = "spanner"), allow(dead_code))]
    db: String,
    #[cfg_attr(not(feature = "spanner"), allow(dead_code))]
    table: String,
    #[cfg_attr(not(feature = "redis"), allow(dead_code))]
    redis_url: String,
    tries: u32,
    delay_ms: u64,
}

impl Config {
    fn from_env() -> anyhow::Result<Config> {
        let var = |name: &str, default: &str| env::var(name).unwrap_or_else(|_| default.to_string());
        Ok(Config {
            backend: var("KEYLOCK_BACKEND", "memory"),
            key: var("KEYLOCK_KEY", "keylock"),
            dir: env::var_os("KEYLOCK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("keylock")),
            db: var("KEYLOCK_DB", ""),
            table: var("KEYLOCK_TABLE", "locks"),
            redis_url: var("KEYLOCK_REDIS_URL", "redis://127.0.0.1:6379/"),
            tries: var("KEYLOCK_TRIES", "5")
                .parse()
                .context("KEYLOCK_TRIES")?,
            delay_ms: var("KEYLOCK_DELAY_MS", "10")
                .parse()
                .context("KEYLOCK_DELAY_MS")?,
        })
    }

    fn driver(&self) -> anyhow::Result<Box<dyn Driver>> {
        match self.backend.as_str() {
            "memory" => Ok(Box::new(MemoryDriver::new())),
            "file" => Ok(Box::new(FileDriver::new(&self.dir)?)),
            #[cfg(feature = "redis")]
            "redis" => Ok(Box::new(keylock::RedisDriver::open(self.redis_url.as_str())?)),
            #[cfg(feature = "spanner")]
            "spanner" => Ok(Box::new(
                keylock::SpannerDriver::builder()
                    .db(self.db.clone())
                    .table(self.table.clone())
                    .build()?,
            )),
            other => bail!("unsupported backend {other:?}"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_env()?;
    info!("{config:?}");

    let (tx, rx) = channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    let lock = Lock::builder(config.driver()?)
        .key(config.key.clone())
        .tries(config.tries)
        .delay(Duration::from_millis(config.delay_ms))
        .build()?;

    lock.run(|| {
        info!("hello world! holding {}, Ctrl-C to release", lock.key());
        rx.recv()?;
        Ok::<_, anyhow::Error>(())
    })?;

    info!("bye bye world");
    Ok(())
}
