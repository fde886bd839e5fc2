use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use layer_client::Client;
use layer_tl_types as tl;
use tcc_core::{
    domain::{
        AccountInfo, ChannelId, ChannelInfo, ChannelRef, HistoryItem, ItemKind, Membership,
        MessageId, UserId,
    },
    errors::TransportError,
    ports::{ChannelTransport, TransportResult},
};

use crate::errors::classify;

/// Dialogs fetched to learn access hashes of channels we have not seen yet.
const DIALOG_WARMUP: i32 = 200;

/// An authorized user-account client.
pub struct MtprotoTransport {
    client: Client,
    user: UserId,
    connected: AtomicBool,
}

impl MtprotoTransport {
    pub fn new(client: Client, user: UserId) -> Self {
        Self {
            client,
            user,
            connected: AtomicBool::new(true),
        }
    }

    fn peer(channel: ChannelId) -> tl::enums::Peer {
        tl::enums::Peer::Channel(tl::types::PeerChannel {
            channel_id: channel.internal(),
        })
    }

    /// Input peer for `channel`, warming the peer cache from dialogs on a miss.
    async fn input_peer(&self, channel: ChannelId) -> TransportResult<tl::enums::InputPeer> {
        let peer = Self::peer(channel);
        if let Ok(p) = self.client.resolve_to_input_peer(&peer).await {
            return Ok(p);
        }

        tracing::debug!(user = self.user.0, channel = channel.0, "channel not cached, loading dialogs");
        self.client
            .get_dialogs(DIALOG_WARMUP)
            .await
            .map_err(|e| self.fail(&e))?;
        self.client.resolve_to_input_peer(&peer).await.map_err(|_| {
            TransportError::ChannelPrivate(format!(
                "channel {channel} is unknown to this account"
            ))
        })
    }

    async fn input_channel(&self, channel: ChannelId) -> TransportResult<tl::enums::InputChannel> {
        match self.input_peer(channel).await? {
            tl::enums::InputPeer::Channel(c) => Ok(tl::enums::InputChannel::InputChannel(
                tl::types::InputChannel {
                    channel_id: c.channel_id,
                    access_hash: c.access_hash,
                },
            )),
            _ => Err(TransportError::Other(format!("{channel} is not a channel"))),
        }
    }

    /// Classify, and remember when the session itself is gone.
    fn fail(&self, e: &layer_client::InvocationError) -> TransportError {
        let err = classify(e);
        if err == TransportError::Unauthorized
            || matches!(e, layer_client::InvocationError::Io(_) | layer_client::InvocationError::Dropped)
        {
            self.connected.store(false, Ordering::SeqCst);
        }
        err
    }
}

#[async_trait]
impl ChannelTransport for MtprotoTransport {
    async fn resolve_channel(&self, channel: &ChannelRef) -> TransportResult<ChannelId> {
        let name = match channel {
            ChannelRef::Id(id) => return Ok(*id),
            ChannelRef::Username(name) => name,
        };

        let peer = self
            .client
            .resolve_peer(&format!("@{name}"))
            .await
            .map_err(|e| self.fail(&e))?;
        match peer {
            tl::enums::Peer::Channel(c) => ChannelId::from_internal(c.channel_id).ok_or_else(|| {
                TransportError::Other(format!("channel id {} out of range", c.channel_id))
            }),
            _ => Err(TransportError::Other(format!("@{name} is not a channel"))),
        }
    }

    async fn channel_info(&self, channel: ChannelId) -> TransportResult<ChannelInfo> {
        let input = self.input_channel(channel).await?;
        let chats = self
            .client
            .invoke(&tl::functions::channels::GetChannels { id: vec![input] })
            .await
            .map_err(|e| self.fail(&e))?;
        let chats = match chats {
            tl::enums::messages::Chats::Chats(c) => c.chats,
            tl::enums::messages::Chats::Slice(c) => c.chats,
        };

        let bare = channel.internal();
        for chat in chats {
            match chat {
                tl::enums::Chat::Channel(c) if c.id == bare => {
                    return Ok(ChannelInfo {
                        id: channel,
                        title: c.title,
                        username: c.username,
                        protected_content: c.noforwards,
                    })
                }
                tl::enums::Chat::ChannelForbidden(c) if c.id == bare => {
                    return Err(TransportError::ChannelPrivate(c.title));
                }
                _ => {}
            }
        }
        Err(TransportError::ChannelPrivate(format!("channel {channel} not returned")))
    }

    async fn membership(&self, channel: ChannelId) -> TransportResult<Membership> {
        let input = self.input_channel(channel).await?;
        let res = self
            .client
            .invoke(&tl::functions::channels::GetParticipant {
                channel: input,
                participant: tl::enums::InputPeer::PeerSelf,
            })
            .await
            .map_err(|e| self.fail(&e))?;

        let tl::enums::channels::ChannelParticipant::ChannelParticipant(res) = res;
        Ok(match res.participant {
            tl::enums::ChannelParticipant::Creator(_) => Membership::Owner,
            tl::enums::ChannelParticipant::Admin(a) => {
                let tl::enums::ChatAdminRights::ChatAdminRights(rights) = a.admin_rights;
                Membership::Admin {
                    can_post: rights.post_messages,
                }
            }
            tl::enums::ChannelParticipant::ChannelParticipant(_)
            | tl::enums::ChannelParticipant::ParticipantSelf(_) => Membership::Member,
            tl::enums::ChannelParticipant::Banned(_) | tl::enums::ChannelParticipant::Left(_) => {
                Membership::NotMember
            }
        })
    }

    async fn history_page(
        &self,
        channel: ChannelId,
        offset_id: MessageId,
        limit: usize,
    ) -> TransportResult<Vec<HistoryItem>> {
        let peer = self.input_peer(channel).await?;
        let limit = i32::try_from(limit).unwrap_or(100);
        let msgs = self
            .client
            .get_messages(peer, limit, offset_id.0)
            .await
            .map_err(|e| self.fail(&e))?;

        Ok(msgs
            .into_iter()
            .map(|m| {
                let kind = match &m.raw {
                    tl::enums::Message::Message(_) => ItemKind::Content,
                    tl::enums::Message::Service(_) => ItemKind::Service,
                    tl::enums::Message::Empty(_) => ItemKind::Empty,
                };
                HistoryItem {
                    id: MessageId(m.id()),
                    kind,
                }
            })
            .collect())
    }

    async fn copy_message(
        &self,
        from: ChannelId,
        to: ChannelId,
        id: MessageId,
    ) -> TransportResult<()> {
        let from_peer = self.input_peer(from).await?;
        let to_peer = self.input_peer(to).await?;

        // `drop_author` turns the forward into a copy without attribution.
        let req = tl::functions::messages::ForwardMessages {
            silent: false,
            background: false,
            with_my_score: false,
            drop_author: true,
            drop_media_captions: false,
            noforwards: false,
            from_peer,
            id: vec![id.0],
            random_id: vec![layer_client::random_i64_pub()],
            to_peer,
            top_msg_id: None,
            reply_to: None,
            schedule_date: None,
            schedule_repeat_period: None,
            send_as: None,
            quick_reply_shortcut: None,
            effect: None,
            video_timestamp: None,
            allow_paid_stars: None,
            allow_paid_floodskip: false,
            suggested_post: None,
        };
        self.client
            .invoke(&req)
            .await
            .map(|_| ())
            .map_err(|e| self.fail(&e))
    }

    async fn whoami(&self) -> TransportResult<AccountInfo> {
        let me = self.client.get_me().await.map_err(|e| self.fail(&e))?;
        Ok(AccountInfo {
            id: me.id,
            first_name: me.first_name.unwrap_or_default(),
            last_name: me.last_name,
            username: me.username,
            phone: me.phone,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn sign_out(&self) -> TransportResult<()> {
        self.client
            .sign_out()
            .await
            .map(|_| ())
            .map_err(|e| self.fail(&e))
    }

    async fn close(&self) {
        // The client shuts its connection down once the last clone is dropped.
        self.connected.store(false, Ordering::SeqCst);
        tracing::debug!(user = self.user.0, "transport closed");
    }
}
