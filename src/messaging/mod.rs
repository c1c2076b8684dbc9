//! Outgoing message queue and token status service.
//!
//! Each transport peripheral owns a [`MessageList`] holding copies of the
//! queued payloads in FIFO order. The status of every queued message is
//! tracked system-wide by [`Messaging`] under a caller-visible [`Token`],
//! decoupled from the list storage. Only the owning peripheral advances its
//! list; everyone else observes progress with [`Messaging::query_message_status`].
//!
//! Lifecycle: `Queued -> Sending -> Complete`, or `-> Abandoned` when the
//! peripheral is released. Terminal statuses stay queryable for
//! [`STATUS_RETENTION_MS`]; after that the token reports `Unknown`.

use core::cell::RefCell;
use core::num::NonZeroU32;

use critical_section::Mutex;
use heapless::{Deque, Vec};

use crate::config::{MESSAGE_MAX_SIZE, STATUS_RETENTION_MS, STATUS_TABLE_SIZE, TX_QUEUE_DEPTH};
use crate::os::{is_time_up, System};
use crate::rtos::{InitError, Task, TaskId};

/// Opaque, non-zero message identifier, unique while outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Token(NonZeroU32);

impl Token {
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageStatus {
    Queued,
    Sending,
    Complete,
    Abandoned,
    /// Never issued, or already reclaimed
    Unknown,
}

impl MessageStatus {
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Complete | MessageStatus::Abandoned)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessagingError {
    /// Zero-length payload
    Empty,
    /// Payload larger than `MESSAGE_MAX_SIZE`
    TooLarge,
    /// The peripheral's list is at `TX_QUEUE_DEPTH`
    ListFull,
    /// Every status slot holds an outstanding message
    StatusTableFull,
    /// Token is not in the status table
    UnknownToken,
    /// Head of the list is still queued or sending
    NotFinished,
    /// Nothing queued
    ListEmpty,
}

pub type Result<T> = core::result::Result<T, MessagingError>;

/// One queued unit of outbound data
#[derive(Debug)]
pub struct Message {
    token: Token,
    data: Vec<u8, MESSAGE_MAX_SIZE>,
}

impl Message {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// FIFO of messages owned by one peripheral. The head is the only message
/// that may be in flight.
#[derive(Debug)]
pub struct MessageList {
    messages: Deque<Message, TX_QUEUE_DEPTH>,
}

impl MessageList {
    pub const fn new() -> Self {
        Self {
            messages: Deque::new(),
        }
    }

    pub fn head(&self) -> Option<&Message> {
        self.messages.front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.messages.iter().map(|m| m.token)
    }
}

impl Default for MessageList {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
struct StatusEntry {
    token: Token,
    status: MessageStatus,
    /// Time the status became terminal
    finished_at: u32,
}

struct Registry {
    next_token: u32,
    entries: Vec<StatusEntry, STATUS_TABLE_SIZE>,
}

impl Registry {
    const fn new() -> Self {
        Self {
            next_token: 1,
            entries: Vec::new(),
        }
    }

    fn position(&self, token: Token) -> Option<usize> {
        self.entries.iter().position(|e| e.token == token)
    }

    fn next_token(&mut self) -> Token {
        loop {
            let candidate = self.next_token;
            self.next_token = match self.next_token.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            // After a wrap, skip values still in use
            if let Some(nz) = NonZeroU32::new(candidate) {
                let token = Token(nz);
                if self.position(token).is_none() {
                    return token;
                }
            }
        }
    }

    /// Make room by dropping the oldest terminal entry
    fn evict_oldest_finished(&mut self, now: u32) -> bool {
        let oldest = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status.is_terminal())
            .max_by_key(|(_, e)| now.wrapping_sub(e.finished_at))
            .map(|(i, _)| i);
        match oldest {
            Some(i) => {
                self.entries.swap_remove(i);
                true
            }
            None => false,
        }
    }
}

/// System-wide token status service. Also a scheduled task: its active state
/// reclaims finished statuses.
pub struct Messaging {
    registry: Mutex<RefCell<Registry>>,
}

impl Messaging {
    pub const fn new() -> Self {
        Self {
            registry: Mutex::new(RefCell::new(Registry::new())),
        }
    }

    /// Copy `data` to the tail of `list` and issue its token.
    pub fn queue_message(&self, list: &mut MessageList, data: &[u8], now: u32) -> Result<Token> {
        if data.is_empty() {
            return Err(MessagingError::Empty);
        }
        let payload = Vec::from_slice(data).map_err(|_| MessagingError::TooLarge)?;
        if list.messages.is_full() {
            return Err(MessagingError::ListFull);
        }

        critical_section::with(|cs| {
            let mut registry = self.registry.borrow_ref_mut(cs);
            if registry.entries.is_full() && !registry.evict_oldest_finished(now) {
                return Err(MessagingError::StatusTableFull);
            }
            let token = registry.next_token();
            registry
                .entries
                .push(StatusEntry {
                    token,
                    status: MessageStatus::Queued,
                    finished_at: now,
                })
                .map_err(|_| MessagingError::StatusTableFull)?;
            list.messages
                .push_back(Message {
                    token,
                    data: payload,
                })
                .map_err(|_| MessagingError::ListFull)?;
            Ok(token)
        })
    }

    pub fn update_message_status(&self, token: Token, status: MessageStatus, now: u32) -> Result<()> {
        critical_section::with(|cs| {
            let mut registry = self.registry.borrow_ref_mut(cs);
            let i = registry.position(token).ok_or(MessagingError::UnknownToken)?;
            let entry = &mut registry.entries[i];
            entry.status = status;
            if status.is_terminal() {
                entry.finished_at = now;
            }
            Ok(())
        })
    }

    pub fn query_message_status(&self, token: Token) -> MessageStatus {
        critical_section::with(|cs| {
            let registry = self.registry.borrow_ref(cs);
            registry
                .position(token)
                .map(|i| registry.entries[i].status)
                .unwrap_or(MessageStatus::Unknown)
        })
    }

    /// Remove the head of `list` once its status is terminal.
    pub fn dequeue_message(&self, list: &mut MessageList) -> Result<Message> {
        let head = list.head().ok_or(MessagingError::ListEmpty)?;
        let status = self.query_message_status(head.token);
        if !status.is_terminal() && status != MessageStatus::Unknown {
            return Err(MessagingError::NotFinished);
        }
        list.messages.pop_front().ok_or(MessagingError::ListEmpty)
    }

    /// Number of statuses currently held (outstanding + retained)
    pub fn tracked(&self) -> usize {
        critical_section::with(|cs| self.registry.borrow_ref(cs).entries.len())
    }

    /// Reclaim terminal statuses older than the retention window.
    pub fn reclaim(&self, now: u32) {
        critical_section::with(|cs| {
            let mut registry = self.registry.borrow_ref_mut(cs);
            registry
                .entries
                .retain(|e| !(e.status.is_terminal() && is_time_up(e.finished_at, now, STATUS_RETENTION_MS)));
        });
    }
}

impl Default for Messaging {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for Messaging {
    fn id(&self) -> TaskId {
        TaskId::Messaging
    }

    fn initialize(&self, _sys: &System) -> core::result::Result<(), InitError> {
        Ok(())
    }

    fn run_active_state(&self, sys: &System) {
        self.reclaim(sys.now_ms());
    }
}
