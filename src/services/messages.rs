//! User-facing texts, command names and keyboards.

use crate::{gateway::Keyboard, state::session::User};

pub const CMD_START: &str = "/start";
pub const CMD_RULES: &str = "/rules";
pub const CMD_FEEDBACK: &str = "/feedback";
pub const CMD_PROFILE: &str = "/profile";
pub const CMD_ADD_PLAYER: &str = "/add";
pub const CMD_BAN: &str = "/ban";

pub const CREATE_BUTTON: &str = "🔥 Create a game";
pub const JOIN_BUTTON: &str = "🎮 Join a game";
pub const LEAVE_BUTTON: &str = "🏁 Leave";
pub const RULES_BUTTON: &str = "Rules";
pub const PROFILE_BUTTON: &str = "👽 Profile";

pub const CHAT_NOT_ALLOWED: &str = "🙅 The bot does not work in group chats";
pub const FEEDBACK_PROMPT: &str = "You can send an anonymous review";
pub const FEEDBACK_THANKS: &str = "Thanks, your review was delivered";
pub const BAN_PROMPT: &str = "Send the username of the user to ban";
pub const PROFILE_PROMPT: &str = "Send the @username of the user";
pub const USER_NOT_FOUND: &str = "User not found";
pub const JOIN_CODE_PROMPT: &str = "Send the join code of the game";
pub const JOIN_CODE_INVALID: &str = "A join code is a number, try again";
pub const MATCH_NOT_FOUND: &str = "Game room not found";
pub const JOINED_MATCH: &str = "You joined the game!";
pub const LEFT_SESSIONS: &str = "You left all game sessions";
pub const OFFLINE_PLAYER_PROMPT: &str = "Send the name of the offline player";
pub const OFFLINE_PLAYER_ADDED: &str =
    "Offline player added. Every message for them will be sent to you";
pub const JOIN_MATCH_FIRST: &str = "Join a game before adding offline players";
pub const MATCH_CREATED: &str = "🦄 Game room created and you are in.\n\n🥳 Share this \
    code with the people you play with and send `start` once everyone has joined";

pub const RULES: &str = "🔖 *Rules*\n\n\
    Within the round time every player names one word per category, each starting with \
    the drawn letter.\n\
    After a few rounds the players with the most points win 🏆\n\n\
    📢 *Vote* - after each turn players decide whether the answers count\n\n\
    💎 *Bloops* - bonus tasks that randomly drop to a player during their turn\n\n\
    *Commands:*\n\
    /start - short introduction\n\
    /rules - these rules\n\
    /feedback - send an anonymous review\n\
    /profile - look at another player's profile\n\
    /add - add an offline player to the game you joined; their turns are sent to you";

/// Greeting sent on `/start`.
pub fn greeting(user: &User) -> String {
    format!(
        "Hi, {}\n\nThis bot hosts small word quizzes played offline: it draws letters, \
         counts points and keeps the leaderboard, you play!\n\n*Rules:* {CMD_RULES}",
        user.display_name()
    )
}

/// Profile card of `user`.
pub fn profile(user: &User) -> String {
    let handle = if user.username.is_empty() {
        String::new()
    } else {
        format!(" (@{})", user.username)
    };
    format!(
        "👽 *{}*{handle}\n\n⭐ Stars: {}\n💎 Bloops: {}",
        user.display_name(),
        user.stars,
        user.bloops
    )
}

/// Keyboard shown outside of any session.
pub fn main_keyboard() -> Keyboard {
    Keyboard::Reply(vec![
        vec![CREATE_BUTTON.to_owned()],
        vec![JOIN_BUTTON.to_owned()],
        vec![RULES_BUTTON.to_owned(), PROFILE_BUTTON.to_owned()],
    ])
}

/// Keyboard shown while playing.
pub fn leave_keyboard() -> Keyboard {
    Keyboard::Reply(vec![vec![LEAVE_BUTTON.to_owned()]])
}

/// Anonymous review forwarded to the administrator.
pub fn feedback_for_admin(review: &str) -> String {
    format!("📝 New review:\n\n{review}")
}

/// Confirmation sent to the administrator after a ban.
pub fn user_banned(username: &str) -> String {
    format!("🚫 @{username} is banned")
}
