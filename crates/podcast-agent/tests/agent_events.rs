use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use podcast_agent::agent::{
    BackgroundAgent, ClickOutcome, NotificationState, FALLBACK_PUSH_BODY, FALLBACK_PUSH_TITLE,
};
use podcast_agent::assets::{
    AssetCache, AssetRequest, AssetResponse, MemoryCacheStorage, Network, NetworkError,
    ResponseSource,
};
use podcast_agent::core::{AgentCore, AgentHandle, REMINDER_BODY, REMINDER_TITLE};
use podcast_agent::host::HeadlessHost;
use podcast_proto::config::AgentConfig;
use podcast_proto::protocol::{AgentMessage, DEFAULT_ICON, NOTIFICATION_TAG};
use tokio::task::JoinHandle;

/// Answers every GET with a small page.
struct StaticNetwork;

#[async_trait]
impl Network for StaticNetwork {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, NetworkError> {
        Ok(AssetResponse::new(200, format!("page at {}", request.url)))
    }
}

fn agent_with(host: Arc<HeadlessHost>) -> Arc<BackgroundAgent> {
    let config = AgentConfig::default();
    let assets = AssetCache::from_config(
        &config,
        Arc::new(MemoryCacheStorage::new()),
        Arc::new(StaticNetwork),
    )
    .unwrap();
    Arc::new(BackgroundAgent::new(&config, assets, host.clone(), host).unwrap())
}

fn start(agent: Arc<BackgroundAgent>) -> (AgentHandle, JoinHandle<anyhow::Result<()>>) {
    start_with(agent, &AgentConfig::default())
}

fn start_with(
    agent: Arc<BackgroundAgent>,
    config: &AgentConfig,
) -> (AgentHandle, JoinHandle<anyhow::Result<()>>) {
    let (handle, rx) = AgentCore::channel(config);
    let core = AgentCore::new(agent);
    (handle, tokio::spawn(core.run(rx)))
}

/// Stop the loop and wait until every in-flight handler has finished.
async fn drain(handle: &AgentHandle, task: JoinHandle<anyhow::Result<()>>) {
    handle.shutdown().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn show_notification_message_uses_defaults() {
    let host = Arc::new(HeadlessHost::new());
    let (handle, task) = start(agent_with(host.clone()));

    handle.post_message(AgentMessage::show_notification("Hi", "there"));
    drain(&handle, task).await;

    let shown = host.notifications().await;
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "Hi");
    assert_eq!(shown[0].options.body, "there");
    assert_eq!(shown[0].options.icon, DEFAULT_ICON);
    assert_eq!(shown[0].options.badge, DEFAULT_ICON);
    assert_eq!(shown[0].options.data.url, "/");
    assert_eq!(shown[0].options.tag, None);
}

#[tokio::test]
async fn unknown_message_is_ignored() {
    let host = Arc::new(HeadlessHost::new());
    let (handle, task) = start(agent_with(host.clone()));

    let message: AgentMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
    handle.post_message(message);
    drain(&handle, task).await;

    assert!(host.notifications().await.is_empty());
}

#[tokio::test]
async fn malformed_push_still_displays_default_notification() {
    let host = Arc::new(HeadlessHost::new());
    let (handle, task) = start(agent_with(host.clone()));

    handle.deliver_push(Some(b"{not json".to_vec()));
    drain(&handle, task).await;

    let shown = host.notifications().await;
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, FALLBACK_PUSH_TITLE);
    assert_eq!(shown[0].options.body, FALLBACK_PUSH_BODY);
    assert_eq!(shown[0].options.data.url, "/");
    assert_eq!(shown[0].options.vibrate, vec![200, 100, 200]);
    assert!(!shown[0].options.require_interaction);
}

#[tokio::test]
async fn push_without_data_still_displays() {
    let host = Arc::new(HeadlessHost::new());
    let agent = agent_with(host.clone());

    let id = agent.handle_push(None).await.expect("displayed");
    assert_eq!(agent.notification_state(id).await, Some(NotificationState::Displayed));
    assert_eq!(host.notifications().await[0].title, FALLBACK_PUSH_TITLE);
}

#[tokio::test]
async fn repeated_pushes_replace_each_other() {
    let host = Arc::new(HeadlessHost::new());
    let agent = agent_with(host.clone());

    let first = agent
        .handle_push(Some(br#"{"title":"one","body":"1"}"#))
        .await
        .unwrap();
    agent
        .handle_push(Some(br#"{"title":"two","body":"2"}"#))
        .await
        .unwrap();

    let shown = host.notifications().await;
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "two");
    assert_eq!(shown[0].options.tag.as_deref(), Some(NOTIFICATION_TAG));
    assert_eq!(host.shown_total().await, 2);
    // The replaced notification is no longer tracked
    assert_eq!(agent.notification_state(first).await, None);
}

#[tokio::test]
async fn click_focuses_matching_client() {
    let host = Arc::new(HeadlessHost::new());
    let agent = agent_with(host.clone());
    host.add_client("http://localhost:3000/library").await;
    let target = host
        .add_client("http://localhost:3000/episodes/12?autoplay=1")
        .await;

    let id = agent
        .handle_push(Some(br#"{"title":"t","body":"b","url":"/episodes/12?from=push"}"#))
        .await
        .unwrap();
    let outcome = agent.handle_notification_click(id).await;

    assert_eq!(outcome, ClickOutcome::Focused(target));
    assert!(host.notifications().await.is_empty());
    assert_eq!(agent.notification_state(id).await, None);
    let clients = host.clients().await;
    assert_eq!(clients.len(), 2);
    assert!(clients.iter().find(|c| c.id == target).unwrap().focused);
}

#[tokio::test]
async fn click_opens_window_when_nothing_matches() {
    let host = Arc::new(HeadlessHost::new());
    let agent = agent_with(host.clone());
    host.add_client("http://localhost:3000/library").await;

    let id = agent
        .handle_push(Some(br#"{"title":"t","body":"b","url":"/episodes/3"}"#))
        .await
        .unwrap();
    let outcome = agent.handle_notification_click(id).await;

    let ClickOutcome::Opened(opened) = outcome else {
        panic!("expected a new window, got {:?}", outcome);
    };
    let clients = host.clients().await;
    let window = clients.iter().find(|c| c.id == opened).unwrap();
    assert_eq!(window.url, "http://localhost:3000/episodes/3");
    assert!(window.focused);
}

#[tokio::test]
async fn click_uses_target_of_notification_shown_by_earlier_agent() {
    let host = Arc::new(HeadlessHost::new());
    let id = agent_with(host.clone())
        .handle_push(Some(br#"{"title":"t","body":"b","url":"/episodes/7"}"#))
        .await
        .unwrap();

    // A restarted agent has no record of the notification
    let restarted = agent_with(host.clone());
    assert_eq!(restarted.notification_state(id).await, None);

    let outcome = restarted.handle_notification_click(id).await;
    let ClickOutcome::Opened(opened) = outcome else {
        panic!("expected a new window, got {:?}", outcome);
    };
    let clients = host.clients().await;
    let window = clients.iter().find(|c| c.id == opened).unwrap();
    assert_eq!(window.url, "http://localhost:3000/episodes/7");
    assert!(host.notifications().await.is_empty());
}

#[tokio::test]
async fn concurrent_clicks_do_not_panic() {
    for _ in 0..20 {
        let host = Arc::new(HeadlessHost::new());
        let agent = agent_with(host.clone());
        let id = agent.handle_push(None).await.unwrap();

        let (a, b) = tokio::join!(
            agent.handle_notification_click(id),
            agent.handle_notification_click(id)
        );

        assert_ne!(a, ClickOutcome::Failed);
        assert_ne!(b, ClickOutcome::Failed);
        // Both may miss and open; at least one window exists either way
        let windows = host.clients().await.len();
        assert!((1..=2).contains(&windows), "{} windows", windows);
    }
}

#[tokio::test]
async fn clicks_through_the_handle_race_freely() {
    let host = Arc::new(HeadlessHost::new());
    let agent = agent_with(host.clone());
    let id = agent.handle_push(None).await.unwrap();
    let (handle, task) = start(agent);

    handle.notification_clicked(id);
    handle.notification_clicked(id);
    drain(&handle, task).await;

    let windows = host.clients().await.len();
    assert!((1..=2).contains(&windows), "{} windows", windows);
}

#[tokio::test]
async fn dismissed_notification_is_forgotten() {
    let host = Arc::new(HeadlessHost::new());
    let agent = agent_with(host.clone());
    let id = agent.handle_push(None).await.unwrap();

    agent.handle_notification_dismissed(id).await;
    assert_eq!(agent.notification_state(id).await, None);
    assert!(host.clients().await.is_empty());
}

#[tokio::test]
async fn denied_permission_does_not_stop_the_agent() {
    let host = Arc::new(HeadlessHost::denying());
    let (handle, task) = start(agent_with(host.clone()));

    handle.post_message(AgentMessage::show_notification("Hi", ""));
    handle.deliver_push(None);
    drain(&handle, task).await;

    assert!(host.notifications().await.is_empty());
}

#[tokio::test]
async fn install_activate_and_fetch_through_handle() {
    let host = Arc::new(HeadlessHost::new());
    let agent = agent_with(host.clone());
    let (handle, task) = start(agent.clone());

    handle.install().await;
    handle.activate().await;
    let outcome = handle
        .fetch(AssetRequest::get("http://localhost:3000/index.html"))
        .await
        .unwrap();
    assert_eq!(outcome.source, ResponseSource::Cache);
    assert!(host.is_claimed().await);

    drain(&handle, task).await;
}

#[tokio::test]
async fn fetch_after_shutdown_reports_agent_gone() {
    let host = Arc::new(HeadlessHost::new());
    let (handle, task) = start(agent_with(host));
    drain(&handle, task).await;

    let err = handle
        .fetch(AssetRequest::get("http://localhost:3000/"))
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::Unreachable { .. }));
}

#[tokio::test]
async fn posting_after_agent_stopped_is_silently_dropped() {
    let host = Arc::new(HeadlessHost::new());
    let (handle, task) = start(agent_with(host.clone()));
    drain(&handle, task).await;

    handle.post_message(AgentMessage::show_notification("late", ""));
    handle.deliver_push(None);
    tokio::task::yield_now().await;

    assert!(host.notifications().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn reminder_fires_after_its_delay() {
    let host = Arc::new(HeadlessHost::new());
    let (handle, task) = start(agent_with(host.clone()));

    assert_eq!(handle.reminder_delay(), Duration::from_secs(30));
    handle.schedule_default_reminder();

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(host.notifications().await.is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    drain(&handle, task).await;

    let shown = host.notifications().await;
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, REMINDER_TITLE);
    assert_eq!(shown[0].options.body, REMINDER_BODY);
}

#[tokio::test(start_paused = true)]
async fn reminder_delay_comes_from_config() {
    let host = Arc::new(HeadlessHost::new());
    let config = AgentConfig {
        reminder_delay_secs: 90,
        ..AgentConfig::default()
    };
    let (handle, task) = start_with(agent_with(host.clone()), &config);

    handle.schedule_default_reminder();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(host.notifications().await.is_empty());

    tokio::time::sleep(Duration::from_secs(31)).await;
    drain(&handle, task).await;

    let shown = host.notifications().await;
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, REMINDER_TITLE);
}

#[tokio::test(start_paused = true)]
async fn reminder_is_lost_when_agent_is_gone() {
    let host = Arc::new(HeadlessHost::new());
    let (handle, task) = start(agent_with(host.clone()));

    handle.schedule_reminder(
        Duration::from_secs(5),
        AgentMessage::show_notification("never", ""),
    );
    drain(&handle, task).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(host.notifications().await.is_empty());
}
