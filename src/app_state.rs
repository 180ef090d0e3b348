use crate::chat::facebook::DEFAULT_GRAPH_BASE;
use crate::chat::{ChatGateway, FacebookChat, TwitchChat, YouTubeChat, api_base};
use crate::comments::{CommentHub, CommentService, CommentStore};
use crate::coordinator::DestinationCoordinator;
use crate::credentials::{
    CredentialStore, FACEBOOK_TOKEN_PATH, GOOGLE_TOKEN_URL, OAuthClient, OAuthRefresher,
    TWITCH_TOKEN_URL, TokenGrant,
};
use crate::egress::LiveKitEgressClient;
use crate::ingest::{IngestionScheduler, IngestionService};
use crate::model::ChatPlatform;
use crate::store::StreamStore;
use crate::streams::StreamService;
use crate::Config;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub streams: StreamService,
    pub coordinator: DestinationCoordinator,
    pub ingestion: IngestionService,
    pub comments: CommentService,
    pub credentials: CredentialStore,
}

fn oauth_client(
    token_url: &str,
    grant: TokenGrant,
    client_id: &Option<String>,
    client_secret: &Option<String>,
) -> Option<OAuthClient> {
    Some(OAuthClient {
        token_url: token_url.to_string(),
        client_id: client_id.clone()?,
        client_secret: client_secret.clone()?,
        grant,
    })
}

impl AppState {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let workspace = Path::new(&config.workspace);
        tokio::fs::create_dir_all(workspace).await?;
        let timeout = config.gateway_timeout();

        let store = StreamStore::open(workspace)?;
        let egress = LiveKitEgressClient::new(
            &config.livekit_url,
            &config.livekit_api_key,
            &config.livekit_api_secret,
            &config.egress_layout,
            timeout,
        )?;
        let coordinator = DestinationCoordinator::new(store.clone(), Arc::new(egress), timeout);

        let mut refresher = OAuthRefresher::new(timeout)?;
        if let Some(client) = oauth_client(
            GOOGLE_TOKEN_URL,
            TokenGrant::RefreshToken,
            &config.youtube_client_id,
            &config.youtube_client_secret,
        ) {
            refresher = refresher.with_client(ChatPlatform::Youtube, client);
        }
        if let Some(client) = oauth_client(
            TWITCH_TOKEN_URL,
            TokenGrant::RefreshToken,
            &config.twitch_client_id,
            &config.twitch_client_secret,
        ) {
            refresher = refresher.with_client(ChatPlatform::Twitch, client);
        }
        let facebook_token_url = format!(
            "{}{FACEBOOK_TOKEN_PATH}",
            api_base(config.facebook_graph_base.as_deref(), DEFAULT_GRAPH_BASE)
        );
        if let Some(client) = oauth_client(
            &facebook_token_url,
            TokenGrant::FacebookExchange,
            &config.facebook_app_id,
            &config.facebook_app_secret,
        ) {
            refresher = refresher.with_client(ChatPlatform::Facebook, client);
        }
        let credentials = CredentialStore::new(Arc::new(refresher));

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let gateways: [(Arc<dyn ChatGateway>, u64); 3] = [
            (
                Arc::new(YouTubeChat::new(http.clone(), config.youtube_api_base.as_deref()))
                    as Arc<dyn ChatGateway>,
                config.youtube_poll_interval_ms,
            ),
            (
                Arc::new(TwitchChat::new(
                    http.clone(),
                    config.twitch_api_base.as_deref(),
                    config.twitch_client_id.as_deref().unwrap_or_default(),
                )) as Arc<dyn ChatGateway>,
                config.twitch_poll_interval_ms,
            ),
            (
                Arc::new(FacebookChat::new(http, config.facebook_graph_base.as_deref()))
                    as Arc<dyn ChatGateway>,
                config.facebook_poll_interval_ms,
            ),
        ];

        let comment_store = CommentStore::new();
        let hub = CommentHub::new();
        let schedulers = gateways.map(|(gateway, interval_ms)| {
            IngestionScheduler::new(
                gateway,
                Arc::new(credentials.clone()),
                comment_store.clone(),
                hub.clone(),
                Duration::from_millis(interval_ms),
                timeout,
            )
        });
        let ingestion = IngestionService::new(store.clone(), schedulers);
        let comments = CommentService::new(store.clone(), comment_store, hub);
        let streams = StreamService::new(
            store,
            coordinator.clone(),
            ingestion.clone(),
            comments.clone(),
        );

        info!(workspace = %workspace.display(), "Application state initialized");
        Ok(Self {
            streams,
            coordinator,
            ingestion,
            comments,
            credentials,
        })
    }

    /// Stops background work. Egress jobs are remote and keep running; their
    /// ids are persisted for the next start.
    pub async fn shutdown(&self) {
        self.ingestion.shutdown().await;
    }
}
