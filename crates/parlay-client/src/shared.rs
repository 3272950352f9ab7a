//! The single-writer handle around one conversation's [`MessageStore`].

use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use parlay_shared::{ConversationId, UserId};
use parlay_store::{ConversationView, MessageStore};

/// Cheap to clone. Every mutation runs under one lock and publishes a
/// complete view before the lock is released, so subscribers never see a
/// half-applied update.
#[derive(Clone)]
pub struct SharedConversation {
    store: Arc<Mutex<MessageStore>>,
    view_tx: Arc<watch::Sender<ConversationView>>,
    local_user: UserId,
    peer: UserId,
}

impl SharedConversation {
    pub fn new(store: MessageStore) -> Self {
        let local_user = store.local_user().clone();
        let peer = store.peer().clone();
        let (view_tx, _rx) = watch::channel(store.view());
        Self {
            store: Arc::new(Mutex::new(store)),
            view_tx: Arc::new(view_tx),
            local_user,
            peer,
        }
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    pub fn conversation_id(&self) -> ConversationId {
        ConversationId::between(&self.local_user, &self.peer)
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationView> {
        self.view_tx.subscribe()
    }

    /// The latest published view.
    pub fn view(&self) -> ConversationView {
        self.view_tx.borrow().clone()
    }

    /// Mutate the store and publish the resulting view.
    pub async fn update<R>(&self, f: impl FnOnce(&mut MessageStore) -> R) -> R {
        let mut store = self.store.lock().await;
        let result = f(&mut store);
        self.view_tx.send_replace(store.view());
        result
    }

    pub async fn read<R>(&self, f: impl FnOnce(&MessageStore) -> R) -> R {
        let store = self.store.lock().await;
        f(&store)
    }
}
