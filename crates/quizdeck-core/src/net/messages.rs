//! Wire message schema. Variant names map to the canonical type constants
//! via `SCREAMING_SNAKE_CASE`; every variant carries a payload struct so the
//! envelope's `payload` field is always present, matching what clients send.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::grade::{AnswerPayload, Correctness};
use crate::minigame::{SwanInput, SwanMode};
use crate::player::{LeaderboardEntry, PlayerId, PlayerInfo};
use crate::quiz::{ItemCursor, MediaRef, QuestionType};
use crate::score::PodiumAward;

/// Connection role declared during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Player,
    Display,
}

/// Top-level session phase. Pause and degraded-persistence are orthogonal
/// flags carried alongside, not phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Lobby,
    ItemOpen,
    ItemLocked,
    ItemRevealed,
    Scoreboard,
    MinigameActive,
    Ended,
}

/// Why an item stopped accepting answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    Timer,
    Host,
    AllAnswered,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreboardScope {
    Top3,
    Top5,
    Top10,
    All,
}

impl ScoreboardScope {
    /// How many rows this scope shows; `None` = unbounded.
    pub fn limit(&self) -> Option<usize> {
        match self {
            Self::Top3 => Some(3),
            Self::Top5 => Some(5),
            Self::Top10 => Some(10),
            Self::All => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Transport handshake; must be the first frame on every connection.
    Hello(HelloMsg),
    HostStart(EmptyMsg),
    HostLock(EmptyMsg),
    HostReveal(EmptyMsg),
    HostShowScoreboard(HostShowScoreboardMsg),
    HostNext(EmptyMsg),
    HostCancelItem(EmptyMsg),
    HostPause(EmptyMsg),
    HostResume(EmptyMsg),
    HostEnd(EmptyMsg),
    HostStartMinigame(HostStartMinigameMsg),
    PlayerJoin(PlayerJoinMsg),
    PlayerAnswer(PlayerAnswerMsg),
    PlayerLeave(EmptyMsg),
    GetSessionState(EmptyMsg),
    SwanChaseInput(SwanChaseInputMsg),
}

/// Payload for commands that carry no data. Serializes as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyMsg {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloMsg {
    pub session_code: String,
    pub role: Role,
    /// Host owner token or player reconnect token. Absent for displays and
    /// first-time players.
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostShowScoreboardMsg {
    pub scope: ScoreboardScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostStartMinigameMsg {
    pub mode: SwanMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerJoinMsg {
    pub name: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAnswerMsg {
    pub answer: AnswerPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwanChaseInputMsg {
    pub input: SwanInput,
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    SessionState(Box<SessionStateMsg>),
    PlayerJoined(PlayerJoinedMsg),
    PlayerLeft(PlayerLeftMsg),
    ItemStarted(ItemStartedMsg),
    ItemLocked(ItemLockedMsg),
    ItemCancelled(ItemCancelledMsg),
    RevealAnswers(RevealAnswersMsg),
    AnswerReceived(AnswerReceivedMsg),
    AnswerCountUpdated(AnswerCountUpdatedMsg),
    LeaderboardUpdate(LeaderboardUpdateMsg),
    ShowScoreboard(ShowScoreboardMsg),
    HideScoreboard(EmptyMsg),
    SessionPaused(SessionPausedMsg),
    SessionResumed(SessionResumedMsg),
    SessionEnded(SessionEndedMsg),
    SpeedPodiumResults(SpeedPodiumResultsMsg),
    SwanChaseStarted(SwanChaseStartedMsg),
    SwanChaseState(SwanChaseStateMsg),
    Error(ErrorMsg),
}

/// Client-safe view of an item: no correctness flags, no canonical ordering,
/// no accepted answers. Those arrive with `REVEAL_ANSWERS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPublic {
    pub id: Uuid,
    pub cursor: ItemCursor,
    pub kind: ItemPublicKind,
    pub timer_secs: u32,
    pub base_points: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemPublicKind {
    Question {
        question_type: QuestionType,
        prompt: String,
        options: Vec<PublicOption>,
        #[serde(default)]
        media: Vec<MediaRef>,
    },
    Break,
    Scoreboard,
    Minigame {
        mode: SwanMode,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicOption {
    pub id: Uuid,
    pub text: String,
}

/// Identity block included only in the snapshot sent to the owning
/// connection: the reconnect token never appears in broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YouInfo {
    pub player_id: PlayerId,
    pub token: String,
    /// Whether this player has already answered the current item.
    pub answered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStateMsg {
    pub session_id: Uuid,
    pub code: String,
    pub quiz_title: String,
    pub phase: SessionPhase,
    pub paused: bool,
    pub degraded: bool,
    pub cursor: Option<ItemCursor>,
    pub item: Option<ItemPublic>,
    /// Milliseconds left on the open item's timer, when one is running.
    pub remaining_ms: Option<u64>,
    pub players: Vec<PlayerInfo>,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub you: Option<YouInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerJoinedMsg {
    pub player: PlayerInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerLeftMsg {
    pub player_id: PlayerId,
    pub name: String,
    /// False when the player merely went offline and may reconnect.
    pub permanent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStartedMsg {
    pub round_title: String,
    pub item: ItemPublic,
    pub timer_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemLockedMsg {
    pub item_id: Uuid,
    pub reason: LockReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCancelledMsg {
    pub item_id: Uuid,
}

/// The correct answer in the shape the question type calls for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorrectAnswer {
    Options { option_ids: Vec<Uuid> },
    Ordered { option_ids: Vec<Uuid> },
    Numeric { value: f64, tolerance_pct: f64 },
    Text { accepted: Vec<String> },
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealedAnswer {
    pub player_id: PlayerId,
    pub correctness: Correctness,
    pub fraction: f64,
    pub points: u32,
    pub answer: AnswerPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollCount {
    pub option_id: Uuid,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealAnswersMsg {
    pub item_id: Uuid,
    pub correct: CorrectAnswer,
    pub explanation: Option<String>,
    pub answers: Vec<RevealedAnswer>,
    /// Per-option tallies; only populated for polls.
    #[serde(default)]
    pub poll_counts: Vec<PollCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerReceivedMsg {
    pub item_id: Uuid,
    pub received_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerCountUpdatedMsg {
    pub item_id: Uuid,
    pub answered: u32,
    pub online: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardUpdateMsg {
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowScoreboardMsg {
    pub scope: ScoreboardScope,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPausedMsg {
    pub remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResumedMsg {
    pub remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEndedMsg {
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedPodiumResultsMsg {
    pub item_id: Uuid,
    pub podium: Vec<PodiumAward>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwanChaseStartedMsg {
    pub mode: SwanMode,
    /// Full engine snapshot: lake layout, obstacles, safe zones, boats.
    pub snapshot: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwanChaseStateMsg {
    pub tick: u64,
    pub diff: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub code: ErrorCode,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_constant<T: Serialize>(msg: &T) -> String {
        let value = serde_json::to_value(msg).unwrap();
        value["type"].as_str().unwrap().to_string()
    }

    #[test]
    fn client_type_constants_match_protocol() {
        let cases = vec![
            (ClientMessage::HostStart(EmptyMsg {}), "HOST_START"),
            (ClientMessage::HostLock(EmptyMsg {}), "HOST_LOCK"),
            (ClientMessage::HostReveal(EmptyMsg {}), "HOST_REVEAL"),
            (
                ClientMessage::HostShowScoreboard(HostShowScoreboardMsg {
                    scope: ScoreboardScope::Top5,
                }),
                "HOST_SHOW_SCOREBOARD",
            ),
            (ClientMessage::HostNext(EmptyMsg {}), "HOST_NEXT"),
            (ClientMessage::HostCancelItem(EmptyMsg {}), "HOST_CANCEL_ITEM"),
            (ClientMessage::HostPause(EmptyMsg {}), "HOST_PAUSE"),
            (ClientMessage::HostResume(EmptyMsg {}), "HOST_RESUME"),
            (ClientMessage::HostEnd(EmptyMsg {}), "HOST_END"),
            (
                ClientMessage::HostStartMinigame(HostStartMinigameMsg {
                    mode: SwanMode::Classic,
                }),
                "HOST_START_MINIGAME",
            ),
            (
                ClientMessage::PlayerJoin(PlayerJoinMsg {
                    name: "a".into(),
                    avatar: "swan".into(),
                }),
                "PLAYER_JOIN",
            ),
            (ClientMessage::PlayerLeave(EmptyMsg {}), "PLAYER_LEAVE"),
            (ClientMessage::GetSessionState(EmptyMsg {}), "GET_SESSION_STATE"),
        ];
        for (msg, expected) in cases {
            assert_eq!(type_constant(&msg), expected);
        }
    }

    #[test]
    fn server_type_constants_match_protocol() {
        let cases = vec![
            (
                ServerMessage::PlayerLeft(PlayerLeftMsg {
                    player_id: Uuid::nil(),
                    name: "a".into(),
                    permanent: false,
                }),
                "PLAYER_LEFT",
            ),
            (
                ServerMessage::ItemLocked(ItemLockedMsg {
                    item_id: Uuid::nil(),
                    reason: LockReason::AllAnswered,
                }),
                "ITEM_LOCKED",
            ),
            (
                ServerMessage::AnswerCountUpdated(AnswerCountUpdatedMsg {
                    item_id: Uuid::nil(),
                    answered: 1,
                    online: 2,
                }),
                "ANSWER_COUNT_UPDATED",
            ),
            (
                ServerMessage::LeaderboardUpdate(LeaderboardUpdateMsg { entries: vec![] }),
                "LEADERBOARD_UPDATE",
            ),
            (ServerMessage::HideScoreboard(EmptyMsg {}), "HIDE_SCOREBOARD"),
            (
                ServerMessage::SessionEnded(SessionEndedMsg { leaderboard: vec![] }),
                "SESSION_ENDED",
            ),
            (
                ServerMessage::SpeedPodiumResults(SpeedPodiumResultsMsg {
                    item_id: Uuid::nil(),
                    podium: vec![],
                }),
                "SPEED_PODIUM_RESULTS",
            ),
            (
                ServerMessage::SwanChaseState(SwanChaseStateMsg {
                    tick: 1,
                    diff: serde_json::json!({}),
                }),
                "SWAN_CHASE_STATE",
            ),
        ];
        for (msg, expected) in cases {
            assert_eq!(type_constant(&msg), expected);
        }
    }

    #[test]
    fn empty_payload_serializes_as_object() {
        let value = serde_json::to_value(ClientMessage::HostStart(EmptyMsg {})).unwrap();
        assert_eq!(value["payload"], serde_json::json!({}));
    }

    #[test]
    fn lock_reason_wire_format() {
        assert_eq!(
            serde_json::to_string(&LockReason::AllAnswered).unwrap(),
            "\"all_answered\""
        );
    }

    #[test]
    fn scoreboard_scope_limits() {
        assert_eq!(ScoreboardScope::Top3.limit(), Some(3));
        assert_eq!(ScoreboardScope::All.limit(), None);
        assert_eq!(
            serde_json::to_string(&ScoreboardScope::Top10).unwrap(),
            "\"top10\""
        );
    }

    #[test]
    fn hello_round_trips() {
        let msg = ClientMessage::Hello(HelloMsg {
            session_code: "ABCDEF".into(),
            role: Role::Player,
            token: None,
        });
        let text = serde_json::to_string(&msg).unwrap();
        let back: ClientMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn answer_payload_round_trips_inside_message() {
        let msg = ClientMessage::PlayerAnswer(PlayerAnswerMsg {
            answer: AnswerPayload::Numeric { value: 115.0 },
        });
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"PLAYER_ANSWER\""));
        let back: ClientMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }
}
