//! Mock Account Connector for Testing
//!
//! Scripted fake of the messaging platform: queue up the results each call
//! should return, then inspect what the delivery core did.

use super::traits::*;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Mock connector for testing
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    open_results: VecDeque<PlatformResult<()>>,
    send_results: VecDeque<PlatformResult<()>>,
    register_results: VecDeque<PlatformResult<()>>,
    missing_credentials: HashSet<AccountId>,
    sent_messages: Vec<SentMessage>,
    contacts: Vec<(AccountId, AccountId)>,
    send_calls: u32,
    hang_sends: bool,
    open_attempts: u32,
    opens: u32,
    closes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub sender: AccountId,
    pub recipient: AccountId,
    pub text: String,
}

impl MockConnector {
    /// Create new mock connector that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `open` call
    pub fn script_open(&self, result: PlatformResult<()>) -> &Self {
        self.state.lock().unwrap().open_results.push_back(result);
        self
    }

    /// Queue the result of the next `send_text` call
    pub fn script_send(&self, result: PlatformResult<()>) -> &Self {
        self.state.lock().unwrap().send_results.push_back(result);
        self
    }

    /// Queue the result of the next `register_contact` call
    pub fn script_register(&self, result: PlatformResult<()>) -> &Self {
        self.state.lock().unwrap().register_results.push_back(result);
        self
    }

    /// Make credential lookup fail for an account
    pub fn without_credentials(&self, account: &AccountId) -> &Self {
        self.state
            .lock()
            .unwrap()
            .missing_credentials
            .insert(account.clone());
        self
    }

    /// Messages the platform accepted
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent_messages.clone()
    }

    /// (owner, contact) pairs registered so far
    pub fn contacts(&self) -> Vec<(AccountId, AccountId)> {
        self.state.lock().unwrap().contacts.clone()
    }

    /// Every `send_text` call, accepted or not
    pub fn send_calls(&self) -> u32 {
        self.state.lock().unwrap().send_calls
    }

    pub fn register_calls(&self) -> usize {
        self.contacts().len()
    }

    /// Every later send waits forever, like a request that never completes
    pub fn hang_sends(&self) -> &Self {
        self.state.lock().unwrap().hang_sends = true;
        self
    }

    /// Calls to `open`, failed ones included
    pub fn open_attempts(&self) -> u32 {
        self.state.lock().unwrap().open_attempts
    }

    /// Successful opens
    pub fn opens(&self) -> u32 {
        self.state.lock().unwrap().opens
    }

    pub fn closes(&self) -> u32 {
        self.state.lock().unwrap().closes
    }
}

#[async_trait]
impl AccountConnector for MockConnector {
    async fn resolve_credentials(&self, account: &AccountId) -> PlatformResult<Credentials> {
        let state = self.state.lock().unwrap();
        if state.missing_credentials.contains(account) {
            return Err(PlatformError::InvalidCredentials(format!(
                "no credentials for {}",
                account
            )));
        }
        Ok(Credentials {
            api_id: "12345".to_string(),
            api_hash: format!("hash-{}", account),
        })
    }

    async fn open(
        &self,
        account: &AccountId,
        _credentials: Credentials,
    ) -> PlatformResult<Box<dyn Connection>> {
        let mut state = self.state.lock().unwrap();
        state.open_attempts += 1;
        state.open_results.pop_front().unwrap_or(Ok(()))?;
        state.opens += 1;
        drop(state);

        Ok(Box::new(MockConnection {
            account: account.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    account: AccountId,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send_text(&mut self, recipient: &AccountId, text: &str) -> PlatformResult<()> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.send_calls += 1;
            state.hang_sends
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        state.send_results.pop_front().unwrap_or(Ok(()))?;
        state.sent_messages.push(SentMessage {
            sender: self.account.clone(),
            recipient: recipient.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn register_contact(&mut self, recipient: &AccountId) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.contacts.push((self.account.clone(), recipient.clone()));
        state.register_results.pop_front().unwrap_or(Ok(()))
    }

    async fn close(self: Box<Self>) -> PlatformResult<()> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}
