use core::time::Duration;
use tokio::sync::watch;

/**
    slot marking that a reply is expected on the serial line

    a writer asking for an acknowledge reserves it before sending, the reader releases it once
    it reached a terminal state. Only one acknowledged conversation can be in flight at a time.
*/
pub struct PendingReply {
    busy: watch::Sender<bool>,
}

impl PendingReply {
    pub fn new() -> Self {
        let (busy, _) = watch::channel(false);
        Self {busy}
    }

    /// wait until the slot is free then take it
    pub async fn reserve(&self) -> Reservation<'_> {
        loop {
            let mut changes = self.busy.subscribe();
            if self.busy.send_if_modified(|busy| if *busy {false} else {*busy = true; true})
                {return self.guard()}
            // the sender lives in self, so waiting can only end by a release
            let _ = changes.wait_for(|busy| !*busy).await;
        }
    }
    /// like [Self::reserve] but gives up after `timeout`
    pub async fn reserve_for(&self, timeout: Duration) -> Option<Reservation<'_>> {
        tokio::time::timeout(timeout, self.reserve()).await.ok()
    }
    /// guard releasing the slot once dropped, whoever reserved it
    pub fn guard(&self) -> Reservation<'_> {
        Reservation {slot: self, kept: false}
    }
    /// free the slot, it does not matter if it was not reserved
    pub fn release(&self) {
        self.busy.send_if_modified(|busy| core::mem::replace(busy, false));
    }
    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }
}

impl Default for PendingReply {
    fn default() -> Self {Self::new()}
}

/// a taken [PendingReply], released on drop unless kept
pub struct Reservation<'s> {
    slot: &'s PendingReply,
    kept: bool,
}

impl Reservation<'_> {
    /// leave the slot busy, until a read or another guard releases it
    pub fn keep(mut self) {self.kept = true}
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if ! self.kept
            {self.slot.release()}
    }
}
