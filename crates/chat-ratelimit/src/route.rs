//! Route families used as accounting keys.
//!
//! Until the server assigns a bucket hash, a request is accounted under its
//! route family (the major resource category) plus the resource ID it targets.

/// Key prefix for guild-scoped routes
pub const GUILD_ROUTE_PREFIX: &str = "guild:";
/// Key prefix for channel-scoped routes
pub const CHANNEL_ROUTE_PREFIX: &str = "channel:";
/// Key prefix for webhook-scoped routes
pub const WEBHOOK_ROUTE_PREFIX: &str = "webhook:";
/// Key prefix for application-scoped routes
pub const APPLICATION_ROUTE_PREFIX: &str = "application:";
/// Key prefix for routes without a major resource
pub const OTHER_ROUTE_PREFIX: &str = "other:";

/// Route family categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    /// Routes under `/guilds/{id}`
    Guild,
    /// Routes under `/channels/{id}`
    Channel,
    /// Routes under `/webhooks/{id}`
    Webhook,
    /// Routes under `/applications/{id}`
    Application,
    /// Any other endpoint family, named so unrelated endpoints don't share a key
    Other(&'static str),
}

/// A route family plus the resource it targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimitRoute {
    pub kind: RouteKind,
    pub resource_id: u64,
}

impl RateLimitRoute {
    #[must_use]
    pub const fn new(kind: RouteKind, resource_id: u64) -> Self {
        Self { kind, resource_id }
    }

    #[must_use]
    pub const fn guild(guild_id: u64) -> Self {
        Self::new(RouteKind::Guild, guild_id)
    }

    #[must_use]
    pub const fn channel(channel_id: u64) -> Self {
        Self::new(RouteKind::Channel, channel_id)
    }

    #[must_use]
    pub const fn webhook(webhook_id: u64) -> Self {
        Self::new(RouteKind::Webhook, webhook_id)
    }

    #[must_use]
    pub const fn application(application_id: u64) -> Self {
        Self::new(RouteKind::Application, application_id)
    }

    #[must_use]
    pub const fn other(family: &'static str) -> Self {
        Self::new(RouteKind::Other(family), 0)
    }

    /// The local accounting key for this route
    #[must_use]
    pub fn key(&self) -> String {
        match self.kind {
            RouteKind::Guild => format!("{GUILD_ROUTE_PREFIX}{}", self.resource_id),
            RouteKind::Channel => format!("{CHANNEL_ROUTE_PREFIX}{}", self.resource_id),
            RouteKind::Webhook => format!("{WEBHOOK_ROUTE_PREFIX}{}", self.resource_id),
            RouteKind::Application => format!("{APPLICATION_ROUTE_PREFIX}{}", self.resource_id),
            RouteKind::Other(family) => format!("{OTHER_ROUTE_PREFIX}{family}:{}", self.resource_id),
        }
    }
}

impl std::fmt::Display for RateLimitRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}
