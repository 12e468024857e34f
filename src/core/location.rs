use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Named places actors move between. Only the distance between them matters: it paces
/// access to tools, nothing is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Location {
    PlannerOffice,
    RelayStation,
    MarketerDesk,
    SpecifierDesk,
    CoordinatorDesk,
    HtmlDesk,
    CssDesk,
    JsDesk,
    ReviewerDesk,
    SaveZone,
    InternetZone,
    MeetingRoom,
    WaterCooler,
}

impl Location {
    /// Fixed coordinates of each location.
    pub fn coordinates(&self) -> (f64, f64, f64) {
        match self {
            Location::PlannerOffice => (0.0, 0.5, -24.0),
            Location::RelayStation => (5.0, 0.5, -20.0),
            Location::MarketerDesk => (30.0, 0.5, -10.0),
            Location::SpecifierDesk => (-30.0, 0.5, -10.0),
            Location::CoordinatorDesk => (30.0, 0.5, 15.0),
            Location::HtmlDesk => (20.0, 0.5, 15.0),
            Location::CssDesk => (25.0, 0.5, 25.0),
            Location::JsDesk => (35.0, 0.5, 25.0),
            Location::ReviewerDesk => (35.0, 0.5, 15.0),
            Location::SaveZone => (35.0, 0.1, -25.0),
            Location::InternetZone => (-35.0, 0.1, -25.0),
            Location::MeetingRoom => (0.0, 0.5, -15.0),
            Location::WaterCooler => (30.0, 0.1, 20.0),
        }
    }

    /// Euclidean distance on the ground plane.
    pub fn distance_to(&self, other: Location) -> f64 {
        let (x1, _, z1) = self.coordinates();
        let (x2, _, z2) = other.coordinates();
        ((x2 - x1).powi(2) + (z2 - z1).powi(2)).sqrt()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Location::PlannerOffice => "PLANNER_OFFICE",
            Location::RelayStation => "RELAY_STATION",
            Location::MarketerDesk => "MARKETER_DESK",
            Location::SpecifierDesk => "SPECIFIER_DESK",
            Location::CoordinatorDesk => "COORDINATOR_DESK",
            Location::HtmlDesk => "HTML_DESK",
            Location::CssDesk => "CSS_DESK",
            Location::JsDesk => "JS_DESK",
            Location::ReviewerDesk => "REVIEWER_DESK",
            Location::SaveZone => "SAVE_ZONE",
            Location::InternetZone => "INTERNET_ZONE",
            Location::MeetingRoom => "MEETING_ROOM",
            Location::WaterCooler => "WATER_COOLER",
        };
        f.write_str(s)
    }
}

/// Fixed-speed travel metric.
#[derive(Debug, Clone, Copy)]
pub struct TravelModel {
    /// Units per second
    pub speed: f64,
    /// Lower bound on any trip
    pub min_delay: Duration,
    /// Multiplier applied to every delay (0.0 makes trips instantaneous)
    pub time_scale: f64,
}

impl Default for TravelModel {
    fn default() -> Self {
        Self {
            speed: 5.0,
            min_delay: Duration::from_millis(500),
            time_scale: 1.0,
        }
    }
}

impl TravelModel {
    /// Delay before an actor travelling from `from` to `to` arrives.
    pub fn travel_time(&self, from: Location, to: Location) -> Duration {
        let speed = if self.speed > 0.0 { self.speed } else { 1.0 };
        let secs = (from.distance_to(to) / speed).max(self.min_delay.as_secs_f64());
        let scaled = (secs * self.time_scale.max(0.0)).max(0.0);
        Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn travel_time_uses_distance_over_speed() {
        let model = TravelModel::default();
        // (35,-25) to (-35,-25) is 70 units at 5 units/s
        let t = model.travel_time(Location::SaveZone, Location::InternetZone);
        assert_eq!(t, Duration::from_secs(14));
    }

    #[test]
    fn short_trips_are_clamped_to_minimum() {
        let model = TravelModel::default();
        let t = model.travel_time(Location::SaveZone, Location::SaveZone);
        assert_eq!(t, Duration::from_millis(500));
    }

    #[test]
    fn time_scale_shrinks_trips() {
        let model = TravelModel {
            time_scale: 0.0,
            ..TravelModel::default()
        };
        assert_eq!(
            model.travel_time(Location::PlannerOffice, Location::JsDesk),
            Duration::ZERO
        );
    }

    #[test]
    fn huge_or_infinite_scales_saturate() {
        for time_scale in [1e300, f64::INFINITY, f64::MAX] {
            let model = TravelModel {
                time_scale,
                ..TravelModel::default()
            };
            assert_eq!(
                model.travel_time(Location::SaveZone, Location::InternetZone),
                Duration::MAX,
                "time_scale {}",
                time_scale
            );
        }
        let model = TravelModel {
            time_scale: f64::NAN,
            ..TravelModel::default()
        };
        assert_eq!(
            model.travel_time(Location::SaveZone, Location::InternetZone),
            Duration::ZERO
        );
    }
}
