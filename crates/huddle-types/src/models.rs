use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;
use crate::validate;

/// A chat user. Users are provisioned externally (the auth service owns
/// them); channels reference them by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            username: username.into(),
            created_at: Utc::now(),
        }
    }
}

// Identity is the id; usernames are unique but mutable upstream.
impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}

impl Hash for User {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    Text,
    Invite,
    Join,
    Kick,
    Leave,
    Create,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "TEXT",
            MessageKind::Invite => "INVITE",
            MessageKind::Join => "JOIN",
            MessageKind::Kick => "KICK",
            MessageKind::Leave => "LEAVE",
            MessageKind::Create => "CREATE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "TEXT" => Some(MessageKind::Text),
            "INVITE" => Some(MessageKind::Invite),
            "JOIN" => Some(MessageKind::Join),
            "KICK" => Some(MessageKind::Kick),
            "LEAVE" => Some(MessageKind::Leave),
            "CREATE" => Some(MessageKind::Create),
            _ => None,
        }
    }
}

/// One entry in a channel's append-only log. Immutable once created;
/// ids are v7 so natural id order approximates creation order.
#[derive(Debug, Clone)]
pub struct GroupMessage {
    pub id: Uuid,
    pub channel_id: Uuid,
    /// `None` for system-generated entries with no acting user.
    pub from: Option<User>,
    pub kind: MessageKind,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// The group-channel aggregate: membership sets plus the message log.
///
/// `messages` holds only the messages appended since the aggregate was
/// loaded; the store drains it on save (the full log lives in the
/// database). `version` backs optimistic concurrency and is advanced by
/// the store on each successful save.
#[derive(Debug, Clone)]
pub struct GroupChannel {
    pub id: Uuid,
    pub name: String,
    pub members: HashSet<User>,
    pub invited: HashSet<User>,
    pub messages: Vec<GroupMessage>,
    pub last_message: Option<GroupMessage>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl GroupChannel {
    /// Create a channel with the creator as sole member. Appends the
    /// CREATE message.
    pub fn create(creator: &User, name: &str) -> Result<Self, ChatError> {
        let name = validate::channel_name(name)?;
        let mut channel = Self {
            id: Uuid::now_v7(),
            name: name.clone(),
            members: HashSet::from([creator.clone()]),
            invited: HashSet::new(),
            messages: Vec::new(),
            last_message: None,
            updated_at: Utc::now(),
            version: 0,
        };
        channel.append(
            creator,
            MessageKind::Create,
            format!("{} created channel {}", creator.username, name),
        );
        Ok(channel)
    }

    /// Invite a user into the channel. The invitee joins `invited` and
    /// becomes a member only once they accept.
    pub fn invite(&mut self, inviter: &User, invitee: &User) -> Result<(), ChatError> {
        if !self.members.contains(inviter) {
            return Err(ChatError::invalid_operation(
                "inviter is not a member of the channel",
            ));
        }
        if inviter == invitee {
            return Err(ChatError::invalid_operation("cannot invite yourself"));
        }
        if self.members.contains(invitee) {
            return Err(ChatError::invalid_operation(
                "invitee is already a member of the channel",
            ));
        }
        if self.invited.contains(invitee) {
            return Err(ChatError::invalid_operation("invitee is already invited"));
        }
        self.invited.insert(invitee.clone());
        self.append(
            inviter,
            MessageKind::Invite,
            format!("{} invited {}", inviter.username, invitee.username),
        );
        Ok(())
    }

    /// Accept a pending invitation, moving the user from `invited` to
    /// `members`.
    pub fn accept_invitation(&mut self, invitee: &User) -> Result<(), ChatError> {
        if !self.invited.contains(invitee) {
            return Err(ChatError::invalid_operation(
                "user has not been invited to the channel",
            ));
        }
        self.invited.remove(invitee);
        self.members.insert(invitee.clone());
        self.append(
            invitee,
            MessageKind::Join,
            format!("{} joined", invitee.username),
        );
        Ok(())
    }

    /// Remove another member. Self-removal goes through `leave`.
    pub fn kick(&mut self, actor: &User, target: &User) -> Result<(), ChatError> {
        if !self.members.contains(actor) {
            return Err(ChatError::invalid_operation(
                "actor is not a member of the channel",
            ));
        }
        if !self.members.contains(target) {
            return Err(ChatError::invalid_operation(
                "target is not a member of the channel",
            ));
        }
        if actor == target {
            return Err(ChatError::invalid_operation(
                "cannot remove yourself from the channel",
            ));
        }
        self.members.remove(target);
        self.append(
            actor,
            MessageKind::Kick,
            format!("{} removed {}", actor.username, target.username),
        );
        Ok(())
    }

    pub fn leave(&mut self, user: &User) -> Result<(), ChatError> {
        if !self.members.contains(user) {
            return Err(ChatError::invalid_operation(
                "user is not a member of the channel",
            ));
        }
        self.members.remove(user);
        self.append(user, MessageKind::Leave, format!("{} left", user.username));
        Ok(())
    }

    /// Post a text message into the channel log.
    pub fn post_message(&mut self, sender: &User, text: &str) -> Result<(), ChatError> {
        let text = validate::message_text(text)?;
        if !self.members.contains(sender) {
            return Err(ChatError::invalid_operation(
                "sender is not a member of the channel",
            ));
        }
        self.append(sender, MessageKind::Text, text);
        Ok(())
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.iter().any(|member| member.id == user_id)
    }

    fn append(&mut self, from: &User, kind: MessageKind, payload: String) {
        let message = GroupMessage {
            id: Uuid::now_v7(),
            channel_id: self.id,
            from: Some(from.clone()),
            kind,
            payload,
            created_at: Utc::now(),
        };
        self.last_message = Some(message.clone());
        self.messages.push(message);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(names: &[&str]) -> Vec<User> {
        names.iter().map(|name| User::new(*name)).collect()
    }

    #[test]
    fn create_trims_name_and_appends_create_message() {
        let creator = User::new("alice");
        let channel = GroupChannel::create(&creator, "  Room A  ").unwrap();

        assert_eq!(channel.name, "Room A");
        assert_eq!(channel.members, HashSet::from([creator.clone()]));
        assert!(channel.invited.is_empty());
        assert_eq!(channel.messages.len(), 1);
        assert_eq!(channel.messages[0].kind, MessageKind::Create);
        assert_eq!(
            channel.last_message.as_ref().unwrap().id,
            channel.messages[0].id
        );
    }

    #[test]
    fn create_rejects_blank_name() {
        let creator = User::new("alice");
        assert!(matches!(
            GroupChannel::create(&creator, "   "),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn every_transition_appends_exactly_one_message() {
        let people = users(&["alice", "bob", "carol"]);
        let (alice, bob, carol) = (&people[0], &people[1], &people[2]);
        let mut channel = GroupChannel::create(alice, "room").unwrap();
        assert_eq!(channel.messages.len(), 1);

        channel.invite(alice, bob).unwrap();
        assert_eq!(channel.messages.len(), 2);
        channel.accept_invitation(bob).unwrap();
        assert_eq!(channel.messages.len(), 3);
        channel.invite(bob, carol).unwrap();
        assert_eq!(channel.messages.len(), 4);
        channel.accept_invitation(carol).unwrap();
        assert_eq!(channel.messages.len(), 5);
        channel.post_message(carol, "hi").unwrap();
        assert_eq!(channel.messages.len(), 6);
        channel.kick(alice, carol).unwrap();
        assert_eq!(channel.messages.len(), 7);
        channel.leave(bob).unwrap();
        assert_eq!(channel.messages.len(), 8);

        let kinds: Vec<MessageKind> = channel.messages.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MessageKind::Create,
                MessageKind::Invite,
                MessageKind::Join,
                MessageKind::Invite,
                MessageKind::Join,
                MessageKind::Text,
                MessageKind::Kick,
                MessageKind::Leave,
            ]
        );
    }

    #[test]
    fn members_and_invited_stay_disjoint() {
        let people = users(&["alice", "bob", "carol"]);
        let (alice, bob, carol) = (&people[0], &people[1], &people[2]);
        let mut channel = GroupChannel::create(alice, "room").unwrap();

        channel.invite(alice, bob).unwrap();
        assert!(channel.members.is_disjoint(&channel.invited));

        channel.accept_invitation(bob).unwrap();
        assert!(channel.members.is_disjoint(&channel.invited));
        assert!(channel.invited.is_empty());

        channel.invite(bob, carol).unwrap();
        channel.kick(alice, bob).unwrap();
        assert!(channel.members.is_disjoint(&channel.invited));
    }

    #[test]
    fn invite_preconditions() {
        let people = users(&["alice", "bob", "carol"]);
        let (alice, bob, carol) = (&people[0], &people[1], &people[2]);
        let mut channel = GroupChannel::create(alice, "room").unwrap();

        // Non-member cannot invite.
        assert!(channel.invite(bob, carol).is_err());
        // Self-invite is rejected.
        assert!(channel.invite(alice, alice).is_err());

        channel.invite(alice, bob).unwrap();
        // Double invite is rejected.
        assert!(channel.invite(alice, bob).is_err());

        channel.accept_invitation(bob).unwrap();
        // Inviting an existing member is rejected.
        assert!(channel.invite(alice, bob).is_err());
    }

    #[test]
    fn accept_requires_pending_invitation() {
        let people = users(&["alice", "bob"]);
        let (alice, bob) = (&people[0], &people[1]);
        let mut channel = GroupChannel::create(alice, "room").unwrap();

        assert!(matches!(
            channel.accept_invitation(bob),
            Err(ChatError::InvalidOperation(_))
        ));
        // A member cannot re-accept either.
        assert!(channel.accept_invitation(alice).is_err());
    }

    #[test]
    fn kick_forbidden_paths() {
        let people = users(&["alice", "bob", "mallory"]);
        let (alice, bob, mallory) = (&people[0], &people[1], &people[2]);
        let mut channel = GroupChannel::create(alice, "room").unwrap();
        channel.invite(alice, bob).unwrap();
        channel.accept_invitation(bob).unwrap();

        // Outsider cannot kick.
        assert!(channel.kick(mallory, alice).is_err());
        // Cannot kick a non-member.
        assert!(channel.kick(alice, mallory).is_err());
        // Cannot kick yourself.
        assert!(channel.kick(alice, alice).is_err());

        let message_count = channel.messages.len();
        channel.kick(alice, bob).unwrap();
        assert_eq!(channel.messages.len(), message_count + 1);
        assert!(!channel.is_member(bob.id));
    }

    #[test]
    fn last_member_leaving_empties_the_channel() {
        let alice = User::new("alice");
        let mut channel = GroupChannel::create(&alice, "room").unwrap();

        channel.leave(&alice).unwrap();
        assert!(channel.members.is_empty());
        assert_eq!(channel.last_message.as_ref().unwrap().kind, MessageKind::Leave);

        // Nobody left to act on the channel.
        assert!(channel.post_message(&alice, "hello?").is_err());
        assert!(channel.leave(&alice).is_err());
    }

    #[test]
    fn post_message_requires_membership_and_valid_text() {
        let people = users(&["alice", "bob"]);
        let (alice, bob) = (&people[0], &people[1]);
        let mut channel = GroupChannel::create(alice, "room").unwrap();

        assert!(channel.post_message(bob, "hi").is_err());
        assert!(matches!(
            channel.post_message(alice, "  "),
            Err(ChatError::Validation(_))
        ));

        channel.post_message(alice, "hello").unwrap();
        let last = channel.last_message.as_ref().unwrap();
        assert_eq!(last.kind, MessageKind::Text);
        assert_eq!(last.payload, "hello");
        assert_eq!(last.from.as_ref().unwrap().id, alice.id);
    }

    #[test]
    fn transitions_advance_updated_at() {
        let people = users(&["alice", "bob"]);
        let (alice, bob) = (&people[0], &people[1]);
        let mut channel = GroupChannel::create(alice, "room").unwrap();

        let before = channel.updated_at;
        channel.invite(alice, bob).unwrap();
        assert!(channel.updated_at >= before);
    }
}
