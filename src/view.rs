//! Presentation state for one booking screen: the selected room and date, the
//! live booking set, and the open booking form. Front-ends drive it through
//! intents and render whatever `ViewState` it publishes.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::{
    BookingClient, BookingDetails, BookingError, BookingFeed, FeedUpdate, slot_document_id,
    validate_date,
};
use crate::identity::{IdentityProvider, User};
use crate::model::{Booking, PartitionKey};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    pub room: String,
    pub date: String,
}

/// The slot a booking form was opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingForm {
    pub room: String,
    pub date: String,
    pub slot: String,
}

/// What the user typed into the booking form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormInput {
    pub course_code: String,
    pub booked_by: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewState {
    pub selection: Selection,
    pub bookings: Vec<Booking>,
    pub loading: bool,
    pub degraded: Option<String>,
    pub form: Option<BookingForm>,
    pub user: Option<User>,
}

/// One line of the slot grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRow {
    pub slot: String,
    pub booking: Option<Booking>,
    pub can_cancel: bool,
}

/// Today's date in the local timezone, `YYYY-MM-DD`.
pub fn today() -> String {
    chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()
}

pub struct ViewModel {
    client: BookingClient,
    identity: Arc<dyn IdentityProvider>,
    state: Arc<watch::Sender<ViewState>>,
    feed_task: Option<JoinHandle<()>>,
}

impl ViewModel {
    /// Start on the first catalog room for `date` and open its feed.
    pub async fn open(
        client: BookingClient,
        identity: Arc<dyn IdentityProvider>,
        date: &str,
    ) -> Result<Self, BookingError> {
        validate_date(date)?;
        let room = client
            .catalog()
            .first_room()
            .ok_or_else(|| BookingError::validation("room", "catalog has no rooms"))?
            .to_string();
        let initial = ViewState {
            selection: Selection {
                room,
                date: date.to_string(),
            },
            user: identity.current_user(),
            loading: true,
            ..ViewState::default()
        };
        let (tx, _) = watch::channel(initial);
        let mut vm = ViewModel {
            client,
            identity,
            state: Arc::new(tx),
            feed_task: None,
        };
        vm.reopen_feed().await;
        Ok(vm)
    }

    /// Receiver for state updates.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    pub fn client(&self) -> &BookingClient {
        &self.client
    }

    pub async fn select_room(&mut self, room: &str) -> Result<(), BookingError> {
        if !self.client.catalog().contains_room(room) {
            return Err(BookingError::validation("room", "unknown room"));
        }
        self.state.send_modify(|s| {
            s.selection.room = room.to_string();
            s.form = None;
        });
        self.reopen_feed().await;
        Ok(())
    }

    pub async fn select_date(&mut self, date: &str) -> Result<(), BookingError> {
        validate_date(date)?;
        self.state.send_modify(|s| {
            s.selection.date = date.to_string();
            s.form = None;
        });
        self.reopen_feed().await;
        Ok(())
    }

    pub async fn select_today(&mut self) -> Result<(), BookingError> {
        self.select_date(&today()).await
    }

    /// Sign in through the identity provider.
    pub async fn sign_in(&mut self) -> Result<User, BookingError> {
        let user = self
            .identity
            .begin_sign_in()
            .await
            .map_err(|e| BookingError::Unauthorized(e.to_string()))?;
        self.state.send_modify(|s| s.user = Some(user.clone()));
        Ok(user)
    }

    pub async fn sign_out(&mut self) -> Result<(), BookingError> {
        self.identity
            .sign_out()
            .await
            .map_err(|e| BookingError::Unknown(e.to_string()))?;
        self.state.send_modify(|s| {
            s.user = None;
            s.form = None;
        });
        Ok(())
    }

    /// Open the booking form for `slot`. Signed out, this starts sign-in
    /// instead and leaves the form closed.
    pub async fn request_book(&mut self, slot: &str) -> Result<(), BookingError> {
        if self.identity.current_user().is_none() {
            self.sign_in().await?;
            return Ok(());
        }
        if !self.client.catalog().contains_slot(slot) {
            return Err(BookingError::validation("slot", "unknown time slot"));
        }

        let selection = self.state.borrow().selection.clone();
        if self.state.borrow().bookings.iter().any(|b| b.slot == slot) {
            return Err(BookingError::SlotConflict {
                id: slot_document_id(&selection.date, &selection.room, slot),
            });
        }
        self.state.send_modify(|s| {
            s.form = Some(BookingForm {
                room: selection.room.clone(),
                date: selection.date.clone(),
                slot: slot.to_string(),
            });
        });
        Ok(())
    }

    /// Submit the open form. A blank `booked_by` falls back to the signed-in
    /// user's display name. The form stays open if the booking fails.
    pub async fn confirm_book(&mut self, input: FormInput) -> Result<Booking, BookingError> {
        let form = self
            .state
            .borrow()
            .form
            .clone()
            .ok_or_else(|| BookingError::validation("slot", "no slot selected"))?;
        let user = self
            .identity
            .current_user()
            .ok_or_else(|| BookingError::Unauthorized("sign in to book".into()))?;

        let booked_by = if input.booked_by.trim().is_empty() {
            user.display_name.clone()
        } else {
            input.booked_by
        };
        let booking = self
            .client
            .create_booking(BookingDetails {
                room: form.room,
                date: form.date,
                slot: form.slot,
                course_code: input.course_code,
                booked_by,
                notes: input.notes,
                user_id: user.uid,
            })
            .await?;
        self.state.send_modify(|s| s.form = None);
        Ok(booking)
    }

    /// Cancel a booking in the current view. Refused locally, without
    /// touching the store, when signed out or when the booking is someone
    /// else's.
    pub async fn request_cancel(&mut self, booking_id: &str) -> Result<(), BookingError> {
        let user = self
            .identity
            .current_user()
            .ok_or_else(|| BookingError::Unauthorized("sign in to cancel a booking".into()))?;
        let owner = self
            .state
            .borrow()
            .bookings
            .iter()
            .find(|b| b.id == booking_id)
            .map(|b| b.user_id.clone());
        if let Some(owner) = owner
            && owner != user.uid
        {
            return Err(BookingError::Unauthorized(
                "only the creator can cancel a booking".into(),
            ));
        }
        self.client.cancel_booking(booking_id, &user.uid).await
    }

    /// Close the booking form.
    pub fn dismiss(&mut self) {
        self.state.send_modify(|s| s.form = None);
    }

    /// One row per catalog slot, in catalog order.
    pub fn grid(&self) -> Vec<SlotRow> {
        let state = self.state.borrow();
        let uid = state.user.as_ref().map(|u| u.uid.as_str());
        self.client
            .catalog()
            .time_slots()
            .iter()
            .map(|slot| {
                let booking = state.bookings.iter().find(|b| &b.slot == slot).cloned();
                let can_cancel = matches!((&booking, uid), (Some(b), Some(uid)) if b.user_id == uid);
                SlotRow {
                    slot: slot.clone(),
                    booking,
                    can_cancel,
                }
            })
            .collect()
    }

    pub fn available_slots(&self) -> usize {
        self.grid().iter().filter(|row| row.booking.is_none()).count()
    }

    /// Stop the live feed.
    pub async fn close(mut self) {
        self.stop_feed().await;
    }

    async fn stop_feed(&mut self) {
        if let Some(task) = self.feed_task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    /// Tear down the old feed completely before the new one opens, so no
    /// stale snapshot can land after the selection changed.
    async fn reopen_feed(&mut self) {
        self.stop_feed().await;
        self.state.send_modify(|s| {
            s.bookings.clear();
            s.loading = true;
            s.degraded = None;
        });
        let selection = self.state.borrow().selection.clone();
        let feed = self.client.subscribe(&selection.date, &selection.room).await;
        self.feed_task = Some(tokio::spawn(pump(feed, self.state.clone())));
    }
}

impl Drop for ViewModel {
    fn drop(&mut self) {
        if let Some(task) = &self.feed_task {
            task.abort();
        }
    }
}

/// Forward feed updates into the view state.
async fn pump(feed: BookingFeed, state: Arc<watch::Sender<ViewState>>) {
    let key: PartitionKey = feed.key().clone();
    let mut updates = Box::pin(feed.into_stream());
    while let Some(update) = updates.next().await {
        state.send_if_modified(|s| {
            if s.selection.date != key.date || s.selection.room != key.room {
                return false;
            }
            match update {
                FeedUpdate::Snapshot(bookings) => {
                    s.bookings = bookings;
                    s.loading = false;
                }
                FeedUpdate::Degraded(e) => {
                    s.loading = false;
                    s.degraded = Some(e.to_string());
                }
            }
            true
        });
    }
    debug!("feed for {key} ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::identity::LocalIdentity;
    use crate::notify::NotifyHub;
    use crate::store::Engine;
    use std::path::PathBuf;
    use std::time::Duration;

    const DATE: &str = "2024-05-01";

    fn client(name: &str) -> BookingClient {
        let dir = std::env::temp_dir().join("roombook_test_view");
        std::fs::create_dir_all(&dir).unwrap();
        let path: PathBuf = dir.join(name);
        let _ = std::fs::remove_file(&path);
        let engine = Arc::new(Engine::new(path, Arc::new(NotifyHub::new())).unwrap());
        BookingClient::new(engine, Arc::new(Catalog::default()))
    }

    async fn settled(vm: &ViewModel) -> ViewState {
        let mut rx = vm.subscribe();
        let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !s.loading))
            .await
            .expect("view never settled")
            .unwrap()
            .clone();
        state
    }

    fn input() -> FormInput {
        FormInput {
            course_code: "COMM 101".into(),
            booked_by: "Sarah".into(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn opens_on_first_room() {
        let identity = Arc::new(LocalIdentity::new("Sarah", None));
        let vm = ViewModel::open(client("first_room.wal"), identity, DATE)
            .await
            .unwrap();
        let state = settled(&vm).await;
        assert_eq!(state.selection.room, "E101");
        assert_eq!(state.selection.date, DATE);
        assert_eq!(vm.available_slots(), 6);
        vm.close().await;
    }

    #[tokio::test]
    async fn signed_out_request_book_signs_in_without_form() {
        let identity = Arc::new(LocalIdentity::new("Sarah", None));
        let mut vm = ViewModel::open(client("signin.wal"), identity.clone(), DATE)
            .await
            .unwrap();
        vm.request_book("07:00 - 09:00").await.unwrap();
        assert!(identity.current_user().is_some());
        assert!(vm.state().form.is_none());

        vm.request_book("07:00 - 09:00").await.unwrap();
        assert_eq!(vm.state().form.unwrap().slot, "07:00 - 09:00");
    }

    #[tokio::test]
    async fn book_then_cancel_through_view() {
        let identity = Arc::new(LocalIdentity::new("Sarah", None));
        let mut vm = ViewModel::open(client("book_cancel.wal"), identity, DATE)
            .await
            .unwrap();
        vm.sign_in().await.unwrap();
        vm.request_book("09:00 - 11:00").await.unwrap();
        let booking = vm.confirm_book(input()).await.unwrap();
        assert!(vm.state().form.is_none());

        let mut rx = vm.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.bookings.iter().any(|b| b.id == booking.id)),
        )
        .await
        .unwrap()
        .unwrap();
        let row = vm
            .grid()
            .into_iter()
            .find(|r| r.slot == "09:00 - 11:00")
            .unwrap();
        assert!(row.can_cancel);
        assert_eq!(vm.available_slots(), 5);

        assert!(matches!(
            vm.request_book("09:00 - 11:00").await,
            Err(BookingError::SlotConflict { .. })
        ));

        vm.request_cancel(&booking.id).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.bookings.is_empty()))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn confirm_failure_keeps_form_open() {
        let identity = Arc::new(LocalIdentity::new("Sarah", None));
        let mut vm = ViewModel::open(client("keep_form.wal"), identity, DATE)
            .await
            .unwrap();
        vm.sign_in().await.unwrap();
        vm.request_book("11:00 - 13:00").await.unwrap();
        let err = vm
            .confirm_book(FormInput {
                course_code: String::new(),
                ..input()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation { field: "courseCode", .. }));
        assert!(vm.state().form.is_some());

        vm.dismiss();
        assert!(vm.state().form.is_none());
    }

    #[tokio::test]
    async fn booked_by_defaults_to_display_name() {
        let identity = Arc::new(LocalIdentity::new("Sarah Lee", None));
        let mut vm = ViewModel::open(client("default_name.wal"), identity, DATE)
            .await
            .unwrap();
        vm.sign_in().await.unwrap();
        vm.request_book("15:00 - 17:00").await.unwrap();
        let booking = vm
            .confirm_book(FormInput {
                booked_by: "  ".into(),
                ..input()
            })
            .await
            .unwrap();
        assert_eq!(booking.booked_by, "Sarah Lee");
    }

    #[tokio::test]
    async fn cancel_refused_locally_for_other_users() {
        let shared = client("foreign_cancel.wal");
        let other = shared
            .create_booking(BookingDetails {
                room: "E101".into(),
                date: DATE.into(),
                slot: "13:00 - 15:00".into(),
                course_code: "MATH 200".into(),
                booked_by: "Someone".into(),
                notes: None,
                user_id: "someone-else".into(),
            })
            .await
            .unwrap();

        let identity = Arc::new(LocalIdentity::new("Sarah", None));
        let mut vm = ViewModel::open(shared.clone(), identity, DATE).await.unwrap();
        assert!(matches!(
            vm.request_cancel(&other.id).await,
            Err(BookingError::Unauthorized(_))
        ));

        vm.sign_in().await.unwrap();
        settled(&vm).await;
        assert!(matches!(
            vm.request_cancel(&other.id).await,
            Err(BookingError::Unauthorized(_))
        ));
        assert!(!vm.grid().iter().any(|r| r.can_cancel));
        assert_eq!(shared.bookings_for(DATE, "E101").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn switching_room_replaces_feed() {
        let shared = client("switch.wal");
        shared
            .create_booking(BookingDetails {
                room: "E101".into(),
                date: DATE.into(),
                slot: "07:00 - 09:00".into(),
                course_code: "COMM 101".into(),
                booked_by: "Sarah".into(),
                notes: None,
                user_id: "u1".into(),
            })
            .await
            .unwrap();

        let identity = Arc::new(LocalIdentity::new("Sarah", None));
        let mut vm = ViewModel::open(shared.clone(), identity, DATE).await.unwrap();
        assert_eq!(settled(&vm).await.bookings.len(), 1);

        vm.select_room("F201").await.unwrap();
        let state = settled(&vm).await;
        assert_eq!(state.selection.room, "F201");
        assert!(state.bookings.is_empty());

        let old = PartitionKey::new(DATE, "E101");
        assert_eq!(shared.engine().notify.watcher_count(&old), 0);

        assert!(vm.select_room("Z999").await.is_err());
        assert!(vm.select_date("2024-13-01").await.is_err());
        assert_eq!(vm.state().selection.room, "F201");
    }
}
