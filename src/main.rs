use anyhow::anyhow;
use clipferry::chat::{ChatSink, TelegramChat};
use clipferry::cookies::CookiePool;
use clipferry::notify::Notices;
use clipferry::relay::{Incoming, Relay};
use clipferry::report::{Reporter, TelegramReporter};
use clipferry::runner::ToolRunner;
use clipferry::{classify, config, FetchContext};
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::dptree;
use teloxide::prelude::*;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config::load().map_err(|e| anyhow!("{e}"))?;
    config.validate().map_err(|e| anyhow!(e))?;

    let work_dir = PathBuf::from(&config.work_dir);
    tokio::fs::create_dir_all(&work_dir).await?;

    let bot = Bot::new(&config.bot_token);
    let chat: Arc<dyn ChatSink> = Arc::new(TelegramChat::new(bot.clone()));

    let runner = ToolRunner::new();
    let reporter: Arc<dyn Reporter> = Arc::new(TelegramReporter::new(
        Arc::clone(&chat),
        config.admin_chat,
        runner.clone(),
        work_dir.clone(),
    ));

    let cookies_dir = PathBuf::from(&config.cookies_dir);
    let insta_cookies = Arc::new(CookiePool::load(&cookies_dir, "cookies", "Instagram"));
    let tiktok_cookies = Arc::new(CookiePool::load(&cookies_dir, "cookie_tiktok", "TikTok"));
    info!(
        instagram = insta_cookies.len(),
        tiktok = tiktok_cookies.len(),
        "cookie pools loaded"
    );

    let ctx = FetchContext {
        runner: runner.clone(),
        ytdlp: config.ytdlp_bin.clone(),
        size_limit: config.size_limit_bytes,
        insta_cookies,
        tiktok_cookies,
        reporter: Arc::clone(&reporter),
    };

    let relay = Arc::new(Relay::new(
        Arc::clone(&chat),
        ctx,
        Arc::clone(&reporter),
        work_dir,
        config.ffprobe_bin.clone(),
        config.size_limit_bytes,
        config.allowed_chats.clone(),
    ));
    let notices = Arc::new(Notices::new(
        Arc::clone(&chat),
        config.allowed_chats.clone(),
        config.startup_notices,
    ));

    let handler = Update::filter_message().endpoint(on_message);
    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![Arc::clone(&relay)])
        .default_handler(|_| async {})
        .build();

    let shutdown = dispatcher.shutdown_token();
    {
        let notices = Arc::clone(&notices);
        tokio::spawn(async move {
            wait_for_stop().await;
            info!("stop signal received, announcing shutdown");
            notices.shutdown().await;
            if let Ok(stopped) = shutdown.shutdown() {
                stopped.await;
            }
        });
    }

    notices.startup().await;
    info!("watching for links");
    dispatcher.dispatch().await;
    info!("dispatcher stopped");
    Ok(())
}

async fn on_message(msg: Message, relay: Arc<Relay>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    if !relay.is_allowed(chat_id) {
        return Ok(());
    }
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user = msg.from();
    let incoming = Incoming {
        chat_id,
        message_id: msg.id.0,
        user_id: user.map(|u| u.id.0).unwrap_or(0),
        user_name: user
            .map(|u| u.full_name())
            .unwrap_or_else(|| "unknown".to_string()),
    };

    if text.trim_start().starts_with("/grabmp3") {
        relay.handle_audio_command(&incoming, text).await;
    } else if let Some(link) = classify(text) {
        relay.handle_link(&incoming, link).await;
    }
    Ok(())
}

async fn wait_for_stop() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
