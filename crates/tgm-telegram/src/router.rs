use std::sync::Arc;

use teloxide::{dptree, prelude::*};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tgm_backend::HttpBackend;
use tgm_core::{
    config::Config,
    dispatch::{Dispatcher as TaskDispatcher, TaskExecutor},
    domain::ChatId,
    identity::IdentityResolver,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    monitor::Monitor,
    rules::{store::spawn_reloader, FileRuleSource, RuleStore},
    store::JsonlLogStore,
};

use crate::{
    control::{self, ControlState},
    handlers,
    shutdown::{stop_transport_on_signal, ShutdownSignals},
    TelegramMessenger,
};

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
}

/// Run the monitor until SIGINT or SIGTERM, then drain background work.
pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let signals = ShutdownSignals::register()?;
    let token = cfg.load_bot_token().await?;
    let bot = Bot::new(token);

    match bot.get_me().await {
        Ok(me) => info!(bot = %me.username(), "tgm started"),
        Err(e) => warn!(error = %e, "get_me failed"),
    }

    let owner_chat = cfg
        .user_id
        .as_deref()
        .and_then(|id| id.trim().parse::<i64>().ok())
        .map(ChatId);

    // The 429 RetryAfter retry stays in the adapter; throttling sits on top.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone(), owner_chat));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let rules = {
        let source = FileRuleSource::new(&cfg.rules_path);
        let owner = cfg.user_id.clone();
        Arc::new(tokio::task::spawn_blocking(move || RuleStore::open(Box::new(source), owner)).await?)
    };
    info!(path = %cfg.rules_path.display(), "rule source");

    let executor = TaskExecutor::new(
        Arc::new(JsonlLogStore::new(&cfg.log_store_path)),
        Arc::new(HttpBackend::new(&cfg.api_url)?),
        messenger.clone(),
        cfg.timeouts,
        cfg.store_retry,
    );
    let dispatcher = Arc::new(TaskDispatcher::start(executor, cfg.dispatch));
    let identities = IdentityResolver::new(Some(messenger.clone()), cfg.identity_ttl, cfg.lookup_timeout);
    let monitor = Arc::new(Monitor::new(rules.clone(), identities, dispatcher.clone()));

    let cancel = CancellationToken::new();
    let reloader = spawn_reloader(rules.clone(), cfg.reload_interval, cancel.clone());
    let control_state = ControlState {
        rules: rules.clone(),
        messenger: messenger.clone(),
    };
    let listener = control::bind(cfg.control_addr).await?;
    let control = tokio::spawn(control::serve(listener, control_state, cancel.clone()));

    let state = Arc::new(AppState { monitor });
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handlers::handle_message))
        .branch(Update::filter_channel_post().endpoint(handlers::handle_message));

    let mut transport = teloxide::dispatching::Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build();
    let signal_watch = stop_transport_on_signal(signals, transport.shutdown_token());
    transport.dispatch().await;
    signal_watch.abort();

    info!("transport stopped, draining");
    cancel.cancel();
    if let Err(e) = reloader.await {
        error!(error = %e, "rule reloader task failed");
    }
    match control.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "control endpoint failed"),
        Err(e) => error!(error = %e, "control endpoint task failed"),
    }
    dispatcher.shutdown().await;
    Ok(())
}
