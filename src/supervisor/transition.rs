use super::{ArrivalDue, Supervisor};
use crate::core::{Content, Envelope, Location};
use tracing::debug;

impl Supervisor {
    /// Starts the travel timer of `actor`. A newer transition replaces the pending one.
    pub(super) fn begin_transition(&mut self, actor: &str, from: Location, to: Location) {
        let delay = self.config.travel.model().travel_time(from, to);
        self.next_trip += 1;
        let trip = self.next_trip;
        debug!("{} travels {} -> {} in {:?} (trip {})", actor, from, to, delay, trip);
        self.transit.insert(actor.to_string(), (trip, to));
        let timer = self.timer_tx.clone();
        let due = ArrivalDue {
            actor: actor.to_string(),
            to,
            trip,
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timer.send(due);
        });
    }

    /// Delivers the arrival unless the actor has started another trip since.
    pub(super) fn on_arrival(&mut self, due: ArrivalDue) {
        match self.transit.get(&due.actor) {
            Some((trip, _)) if *trip == due.trip => {}
            _ => {
                debug!("dropping stale arrival of {} at {} (trip {})", due.actor, due.to, due.trip);
                return;
            }
        }
        self.transit.remove(&due.actor);
        self.deliver(Envelope::control(due.actor, Content::Arrived(due.to)));
    }
}
