//! In-process fakes for the transport ports, shared by unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    domain::{
        AccountInfo, ChannelId, ChannelInfo, ChannelRef, HistoryItem, ItemKind, Membership,
        MessageId, UserId,
    },
    errors::TransportError,
    ports::{
        ChannelTransport, CodeOutcome, LoginConnection, LoginConnector, ProgressSink,
        TransportResult,
    },
    store::SessionBlob,
};

#[derive(Default)]
pub struct FakeTransport {
    pub history: Mutex<Vec<HistoryItem>>,
    pub copy_errors: Mutex<HashMap<i32, VecDeque<TransportError>>>,
    pub page_errors: Mutex<VecDeque<TransportError>>,
    pub copies: Mutex<Vec<MessageId>>,
    pub page_calls: Mutex<Vec<(MessageId, usize)>>,
    pub memberships: Mutex<HashMap<ChannelId, TransportResult<Membership>>>,
    pub infos: Mutex<HashMap<ChannelId, ChannelInfo>>,
    pub usernames: Mutex<HashMap<String, ChannelId>>,
    pub disconnected: AtomicBool,
    pub closes: AtomicUsize,
    pub sign_outs: AtomicUsize,
    pub label: String,
}

impl FakeTransport {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Self::default()
        }
    }

    pub fn with_content(ids: impl IntoIterator<Item = i32>) -> Self {
        let t = Self::new("content");
        t.set_history(ids.into_iter().map(|id| (id, ItemKind::Content)));
        t
    }

    pub fn set_history(&self, items: impl IntoIterator<Item = (i32, ItemKind)>) {
        let mut h: Vec<HistoryItem> = items
            .into_iter()
            .map(|(id, kind)| HistoryItem {
                id: MessageId(id),
                kind,
            })
            .collect();
        h.sort_by_key(|i| i.id);
        *self.history.lock().unwrap() = h;
    }

    pub fn fail_copy(&self, id: i32, errors: impl IntoIterator<Item = TransportError>) {
        self.copy_errors
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .extend(errors);
    }

    pub fn copied(&self) -> Vec<i32> {
        self.copies.lock().unwrap().iter().map(|m| m.0).collect()
    }

    pub fn closed(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelTransport for FakeTransport {
    async fn resolve_channel(&self, channel: &ChannelRef) -> TransportResult<ChannelId> {
        match channel {
            ChannelRef::Id(id) => Ok(*id),
            ChannelRef::Username(name) => self
                .usernames
                .lock()
                .unwrap()
                .get(name)
                .copied()
                .ok_or_else(|| TransportError::Other(format!("USERNAME_NOT_OCCUPIED: {name}"))),
        }
    }

    async fn channel_info(&self, channel: ChannelId) -> TransportResult<ChannelInfo> {
        self.infos
            .lock()
            .unwrap()
            .get(&channel)
            .cloned()
            .ok_or_else(|| TransportError::ChannelPrivate("CHANNEL_PRIVATE".into()))
    }

    async fn membership(&self, channel: ChannelId) -> TransportResult<Membership> {
        self.memberships
            .lock()
            .unwrap()
            .get(&channel)
            .cloned()
            .unwrap_or(Err(TransportError::NotParticipant))
    }

    async fn history_page(
        &self,
        _channel: ChannelId,
        offset_id: MessageId,
        limit: usize,
    ) -> TransportResult<Vec<HistoryItem>> {
        self.page_calls.lock().unwrap().push((offset_id, limit));
        if let Some(e) = self.page_errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        let history = self.history.lock().unwrap();
        Ok(history
            .iter()
            .rev()
            .filter(|i| offset_id.0 == 0 || i.id < offset_id)
            .take(limit)
            .copied()
            .collect())
    }

    async fn copy_message(
        &self,
        _from: ChannelId,
        _to: ChannelId,
        id: MessageId,
    ) -> TransportResult<()> {
        let scripted = self
            .copy_errors
            .lock()
            .unwrap()
            .get_mut(&id.0)
            .and_then(|q| q.pop_front());
        if let Some(e) = scripted {
            return Err(e);
        }
        self.copies.lock().unwrap().push(id);
        Ok(())
    }

    async fn whoami(&self) -> TransportResult<AccountInfo> {
        Ok(AccountInfo {
            id: 1,
            first_name: self.label.clone(),
            last_name: None,
            username: None,
            phone: None,
        })
    }

    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    async fn sign_out(&self) -> TransportResult<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Scripted answers for one login attempt.
#[derive(Clone)]
pub struct LoginScript {
    pub request_code: TransportResult<()>,
    pub codes: HashMap<String, TransportResult<CodeOutcome>>,
    pub password: String,
    pub blob: Vec<u8>,
}

impl Default for LoginScript {
    fn default() -> Self {
        let mut codes = HashMap::new();
        codes.insert("12345".to_string(), Ok(CodeOutcome::Authorized));
        Self {
            request_code: Ok(()),
            codes,
            password: "hunter2".to_string(),
            blob: b"blob".to_vec(),
        }
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub script: Mutex<LoginScript>,
    pub restorable: Mutex<HashMap<Vec<u8>, Arc<FakeTransport>>>,
    pub connects: AtomicUsize,
    pub restores: AtomicUsize,
    pub login_closes: Arc<AtomicUsize>,
    pub phones: Arc<Mutex<Vec<String>>>,
}

impl FakeConnector {
    pub fn set_script(&self, script: LoginScript) {
        *self.script.lock().unwrap() = script;
    }

    pub fn allow_restore(&self, blob: &[u8], transport: Arc<FakeTransport>) {
        self.restorable
            .lock()
            .unwrap()
            .insert(blob.to_vec(), transport);
    }

    pub fn login_closes(&self) -> usize {
        self.login_closes.load(Ordering::SeqCst)
    }

    pub fn phones(&self) -> Vec<String> {
        self.phones.lock().unwrap().clone()
    }
}

#[async_trait]
impl LoginConnector for FakeConnector {
    async fn connect(&self, _user: UserId) -> TransportResult<Box<dyn LoginConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeLogin {
            script: self.script.lock().unwrap().clone(),
            closes: self.login_closes.clone(),
            phones: self.phones.clone(),
            transport: Arc::new(FakeTransport::new("fresh")),
        }))
    }

    async fn restore(
        &self,
        _user: UserId,
        blob: &SessionBlob,
    ) -> TransportResult<Arc<dyn ChannelTransport>> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        match self.restorable.lock().unwrap().get(&blob.0) {
            Some(t) => {
                t.disconnected.store(false, Ordering::SeqCst);
                Ok(t.clone() as Arc<dyn ChannelTransport>)
            }
            None => Err(TransportError::Unauthorized),
        }
    }
}

pub struct FakeLogin {
    script: LoginScript,
    closes: Arc<AtomicUsize>,
    phones: Arc<Mutex<Vec<String>>>,
    transport: Arc<FakeTransport>,
}

#[async_trait]
impl LoginConnection for FakeLogin {
    async fn request_code(&mut self, phone: &str) -> TransportResult<()> {
        self.phones.lock().unwrap().push(phone.to_string());
        self.script.request_code.clone()
    }

    async fn submit_code(&mut self, code: &str) -> TransportResult<CodeOutcome> {
        self.script
            .codes
            .get(code)
            .cloned()
            .unwrap_or(Err(TransportError::InvalidCode))
    }

    async fn submit_password(&mut self, password: &str) -> TransportResult<()> {
        if password == self.script.password {
            Ok(())
        } else {
            Err(TransportError::InvalidPassword)
        }
    }

    async fn export_session(&mut self) -> TransportResult<SessionBlob> {
        Ok(SessionBlob(self.script.blob.clone()))
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn into_transport(self: Box<Self>) -> Arc<dyn ChannelTransport> {
        self.transport
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn report(&self, text: &str) {
        self.lines.lock().unwrap().push(text.to_string());
    }
}
