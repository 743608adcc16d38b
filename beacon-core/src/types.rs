use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of notification types. Per-kind delivery policy lives here as
/// exhaustive matches so adding a kind forces a decision for every policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    CommentReply,
    NewFollower,
    Mention,
    DailyReminder,
    WeeklyDigest,
    SubscriptionExpiring,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 6] = [
        NotificationKind::CommentReply,
        NotificationKind::NewFollower,
        NotificationKind::Mention,
        NotificationKind::DailyReminder,
        NotificationKind::WeeklyDigest,
        NotificationKind::SubscriptionExpiring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::CommentReply => "comment_reply",
            NotificationKind::NewFollower => "new_follower",
            NotificationKind::Mention => "mention",
            NotificationKind::DailyReminder => "daily_reminder",
            NotificationKind::WeeklyDigest => "weekly_digest",
            NotificationKind::SubscriptionExpiring => "subscription_expiring",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "comment_reply" => Some(NotificationKind::CommentReply),
            "new_follower" => Some(NotificationKind::NewFollower),
            "mention" => Some(NotificationKind::Mention),
            "daily_reminder" => Some(NotificationKind::DailyReminder),
            "weekly_digest" => Some(NotificationKind::WeeklyDigest),
            "subscription_expiring" => Some(NotificationKind::SubscriptionExpiring),
            _ => None,
        }
    }

    /// Kinds that are deleted the moment they would become read. A
    /// notification of such a kind never exists in the read state.
    pub fn deleted_once_read(&self) -> bool {
        match self {
            NotificationKind::DailyReminder | NotificationKind::WeeklyDigest => true,
            NotificationKind::CommentReply
            | NotificationKind::NewFollower
            | NotificationKind::Mention
            | NotificationKind::SubscriptionExpiring => false,
        }
    }

    /// Kinds delivered on a recurring schedule, at most once per UTC day.
    /// Deliveries of these kinds are logged so the daily cap survives the
    /// notification row being deleted.
    pub fn recurring(&self) -> bool {
        match self {
            NotificationKind::DailyReminder | NotificationKind::WeeklyDigest => true,
            NotificationKind::CommentReply
            | NotificationKind::NewFollower
            | NotificationKind::Mention
            | NotificationKind::SubscriptionExpiring => false,
        }
    }

    /// Whether viewing the notification center is enough to mark this kind
    /// read, or explicit interaction is required.
    pub fn auto_read(&self) -> bool {
        match self {
            NotificationKind::CommentReply
            | NotificationKind::NewFollower
            | NotificationKind::Mention => true,
            NotificationKind::DailyReminder
            | NotificationKind::WeeklyDigest
            | NotificationKind::SubscriptionExpiring => false,
        }
    }

    pub fn button_label(&self) -> &'static str {
        match self {
            NotificationKind::CommentReply => "Reply",
            NotificationKind::NewFollower => "View profile",
            NotificationKind::Mention => "View",
            NotificationKind::DailyReminder => "Open",
            NotificationKind::WeeklyDigest => "Read digest",
            NotificationKind::SubscriptionExpiring => "Renew",
        }
    }
}

/// Push delivery channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    WebPush,
    MobilePush,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::WebPush, Channel::MobilePush];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::WebPush => "web_push",
            Channel::MobilePush => "mobile_push",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "web_push" => Some(Channel::WebPush),
            "mobile_push" => Some(Channel::MobilePush),
            _ => None,
        }
    }
}

/// Permission kinds a recipient can grant or revoke per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    DailyReminder,
    CommunityActivity,
    ProductNews,
}

impl PermissionKind {
    pub const ALL: [PermissionKind; 3] = [
        PermissionKind::DailyReminder,
        PermissionKind::CommunityActivity,
        PermissionKind::ProductNews,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKind::DailyReminder => "daily_reminder",
            PermissionKind::CommunityActivity => "community_activity",
            PermissionKind::ProductNews => "product_news",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily_reminder" => Some(PermissionKind::DailyReminder),
            "community_activity" => Some(PermissionKind::CommunityActivity),
            "product_news" => Some(PermissionKind::ProductNews),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            PermissionKind::DailyReminder => "Daily reminder",
            PermissionKind::CommunityActivity => "Community activity",
            PermissionKind::ProductNews => "Product news",
        }
    }

    pub fn subtitle(&self) -> &'static str {
        match self {
            PermissionKind::DailyReminder => "A nudge at the time of day you are usually around",
            PermissionKind::CommunityActivity => "Replies, mentions and new followers",
            PermissionKind::ProductNews => "Occasional updates about new features",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub recipient: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub causer_id: Option<String>,
    pub resource_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Serialization for the fan-out payload and the API, including the
    /// static per-kind policy fields clients render from.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "recipient": self.recipient,
            "kind": self.kind.as_str(),
            "title": self.title,
            "body": self.body,
            "link": self.link,
            "read": self.read,
            "read_at": self.read_at,
            "causer_id": self.causer_id,
            "resource_id": self.resource_id,
            "created_at": self.created_at,
            "button_label": self.kind.button_label(),
            "auto_read": self.kind.auto_read(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub causer_id: Option<String>,
    pub resource_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityTimeEstimate {
    pub recipient: String,
    pub kind: NotificationKind,
    pub send_minute: u16,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebPushCredential {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub recipient: String,
    pub kind: PermissionKind,
    pub channel: Channel,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

/// One row of the permission matrix: a permission kind crossed with every
/// channel, whether or not any grant exists.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionEntry {
    pub kind: PermissionKind,
    pub title: &'static str,
    pub subtitle: &'static str,
    pub channels: Vec<ChannelGrant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelGrant {
    pub channel: Channel,
    pub granted: bool,
}
