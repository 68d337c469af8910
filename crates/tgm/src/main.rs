use std::sync::Arc;

use tgm_core::{config::Config, Error};
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tgm_core::logging::init("tgm")?;

    let cfg = Arc::new(Config::load()?);

    if let Err(e) = tgm_telegram::router::run_polling(cfg).await {
        if let Some(Error::Unauthorized(msg)) = e.downcast_ref::<Error>() {
            error!(reason = %msg, "bot is not provisioned; complete provisioning and restart");
            return Err(Error::Unauthorized(msg.clone()));
        }
        return Err(Error::External(format!("monitor failed: {e}")));
    }

    Ok(())
}
