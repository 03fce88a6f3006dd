use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::error;
use uuid::Uuid;

use huddle_bus::{subject, MessageBus};
use huddle_store::Database;
use huddle_types::dto::{GroupChannelProfile, GroupMessageDto, PageRequest, Slice};
use huddle_types::models::{GroupChannel, User};
use huddle_types::{validate, ChatError};

use crate::retry;

/// Transactional orchestrator for the group-channel operations: validate
/// inputs, load the aggregate, run the membership transition, persist
/// under optimistic-conflict retry, then publish the resulting message to
/// every current member's subject.
///
/// Publication happens strictly after the save committed; a failed
/// publish loses the live notification but never the stored message.
pub struct GroupChannelService {
    db: Arc<Database>,
    bus: Arc<dyn MessageBus>,
}

impl GroupChannelService {
    pub fn new(db: Arc<Database>, bus: Arc<dyn MessageBus>) -> Self {
        Self { db, bus }
    }

    pub async fn create_channel(
        &self,
        from_user_id: &str,
        name: &str,
    ) -> Result<GroupChannelProfile, ChatError> {
        let user_id = validate::uuid(from_user_id)?;
        let creator = self.load_user(user_id)?;
        let mut channel = GroupChannel::create(&creator, name)?;
        self.db.save_channel(&mut channel)?;
        Ok(GroupChannelProfile::from(&channel))
    }

    pub async fn invite_to_channel(
        &self,
        from_user_id: &str,
        to_user_id: &str,
        channel_id: &str,
    ) -> Result<GroupMessageDto, ChatError> {
        let inviter_id = validate::uuid(from_user_id)?;
        let invitee_id = validate::uuid(to_user_id)?;
        let channel_id = validate::uuid(channel_id)?;

        let (message, recipients) = retry::on_conflict("invite", move || async move {
            let inviter = self.load_user(inviter_id)?;
            let invitee = self.load_user(invitee_id)?;
            let mut channel = self.load_channel(channel_id)?;
            channel.invite(&inviter, &invitee)?;
            self.db.save_channel(&mut channel)?;
            transition_result(&channel)
        })
        .await?;

        self.publish_to_members(&recipients, &message).await;
        Ok(message)
    }

    pub async fn accept_invitation(
        &self,
        of_user_id: &str,
        channel_id: &str,
    ) -> Result<GroupMessageDto, ChatError> {
        let invitee_id = validate::uuid(of_user_id)?;
        let channel_id = validate::uuid(channel_id)?;

        let (message, recipients) = retry::on_conflict("accept", move || async move {
            let invitee = self.load_user(invitee_id)?;
            let mut channel = self.load_channel(channel_id)?;
            channel.accept_invitation(&invitee)?;
            self.db.save_channel(&mut channel)?;
            transition_result(&channel)
        })
        .await?;

        self.publish_to_members(&recipients, &message).await;
        Ok(message)
    }

    pub async fn remove_from_channel(
        &self,
        from_user_id: &str,
        target_user_id: &str,
        channel_id: &str,
    ) -> Result<GroupMessageDto, ChatError> {
        let actor_id = validate::uuid(from_user_id)?;
        let target_id = validate::uuid(target_user_id)?;
        let channel_id = validate::uuid(channel_id)?;

        let (message, recipients) = retry::on_conflict("kick", move || async move {
            let actor = self.load_user(actor_id)?;
            let target = self.load_user(target_id)?;
            let mut channel = self.load_channel(channel_id)?;
            channel.kick(&actor, &target)?;
            self.db.save_channel(&mut channel)?;
            transition_result(&channel)
        })
        .await?;

        self.publish_to_members(&recipients, &message).await;
        Ok(message)
    }

    pub async fn leave_channel(
        &self,
        of_user_id: &str,
        channel_id: &str,
    ) -> Result<GroupMessageDto, ChatError> {
        let user_id = validate::uuid(of_user_id)?;
        let channel_id = validate::uuid(channel_id)?;

        let (message, recipients) = retry::on_conflict("leave", move || async move {
            let user = self.load_user(user_id)?;
            let mut channel = self.load_channel(channel_id)?;
            channel.leave(&user)?;
            self.db.save_channel(&mut channel)?;
            transition_result(&channel)
        })
        .await?;

        self.publish_to_members(&recipients, &message).await;
        Ok(message)
    }

    pub async fn send_message(
        &self,
        from_user_id: &str,
        channel_id: &str,
        text: &str,
    ) -> Result<GroupMessageDto, ChatError> {
        let sender_id = validate::uuid(from_user_id)?;
        let channel_id = validate::uuid(channel_id)?;

        let (message, recipients) = retry::on_conflict("message", move || async move {
            let sender = self.load_user(sender_id)?;
            let mut channel = self.load_channel(channel_id)?;
            channel.post_message(&sender, text)?;
            self.db.save_channel(&mut channel)?;
            transition_result(&channel)
        })
        .await?;

        self.publish_to_members(&recipients, &message).await;
        Ok(message)
    }

    pub async fn get_all_channels(
        &self,
        of_user_id: &str,
        since: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<Slice<GroupChannelProfile>, ChatError> {
        validate::page_request(&page)?;
        let user_id = validate::uuid(of_user_id)?;
        self.load_user(user_id)?;

        let slice = self.db.find_channels_by_membership(user_id, since, page)?;
        Ok(slice.map(|channel| GroupChannelProfile::from(&channel)))
    }

    pub async fn get_channel_profile(
        &self,
        of_user_id: &str,
        channel_id: &str,
    ) -> Result<GroupChannelProfile, ChatError> {
        let user_id = validate::uuid(of_user_id)?;
        let channel_id = validate::uuid(channel_id)?;

        let user = self.load_user(user_id)?;
        let channel = self.load_channel(channel_id)?;
        if !channel.is_member(user.id) {
            return Err(ChatError::invalid_operation(
                "user is not a member of the channel",
            ));
        }
        Ok(GroupChannelProfile::from(&channel))
    }

    /// Paged message history, readable by members only.
    pub async fn get_channel_messages(
        &self,
        of_user_id: &str,
        channel_id: &str,
        page: PageRequest,
    ) -> Result<Slice<GroupMessageDto>, ChatError> {
        validate::page_request(&page)?;
        let user_id = validate::uuid(of_user_id)?;
        let channel_id = validate::uuid(channel_id)?;

        let user = self.load_user(user_id)?;
        let channel = self.load_channel(channel_id)?;
        if !channel.is_member(user.id) {
            return Err(ChatError::invalid_operation(
                "user is not a member of the channel",
            ));
        }

        let slice = self.db.find_messages_by_channel(channel_id, page)?;
        Ok(slice.map(|message| GroupMessageDto::from(&message)))
    }

    /// Referential check used by the subscribe endpoints.
    pub fn ensure_user(&self, user_id: Uuid) -> Result<(), ChatError> {
        self.load_user(user_id).map(|_| ())
    }

    fn load_user(&self, id: Uuid) -> Result<User, ChatError> {
        self.db
            .find_user_by_id(id)?
            .ok_or(ChatError::UserDoesNotExist)
    }

    fn load_channel(&self, id: Uuid) -> Result<GroupChannel, ChatError> {
        self.db
            .find_channel_by_id(id)?
            .ok_or(ChatError::ChannelDoesNotExist)
    }

    /// One subject publish per current member; failures are logged and
    /// swallowed, the transaction already committed.
    async fn publish_to_members(&self, recipients: &[Uuid], message: &GroupMessageDto) {
        let payload = match serde_json::to_vec(message) {
            Ok(payload) => Bytes::from(payload),
            Err(err) => {
                error!("failed to serialize message {}: {err}", message.id);
                return;
            }
        };
        for user_id in recipients {
            if let Err(err) = self
                .bus
                .publish(&subject::group_user_subject(*user_id), payload.clone())
                .await
            {
                error!("failed to publish message {} to {user_id}: {err}", message.id);
            }
        }
    }
}

/// DTO of the message the transition just appended, plus the members it
/// gets published to (the membership after the transition).
fn transition_result(channel: &GroupChannel) -> Result<(GroupMessageDto, Vec<Uuid>), ChatError> {
    let message = channel
        .last_message
        .as_ref()
        .ok_or_else(|| ChatError::Storage("transition left no message behind".into()))?;
    let recipients = channel.members.iter().map(|member| member.id).collect();
    Ok((GroupMessageDto::from(message), recipients))
}
