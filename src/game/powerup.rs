//! Power-Ups and Fruits
//!
//! Earning (hit streaks and fruits), queueing (slot activation) and applying
//! (on the owner's next paddle hit) power-ups. Only active when the match
//! settings enable power-ups.

use crate::core::vec2::Vec2;
use crate::game::collision::circles_overlap;
use crate::game::config::{
    BOOST_FACTOR, CHARGE_THRESHOLD, CURVE_ACCELERATION, FRUIT_CHARGE, FRUIT_RADIUS, MAX_FRUITS,
    SWARM_CURVE_WIDENING, SWARM_SIZE, SWARM_SPREAD,
};
use crate::game::events::{GameEvent, GameEventData};
use crate::game::state::{Charging, CloneBall, MatchState, PowerUpFruit, PowerUpKind};

// =============================================================================
// ACTIVATION
// =============================================================================

/// Move the item in `slot` into the seat's pending queue.
///
/// Returns false if power-ups are off, the seat is out or the slot is empty.
pub fn queue_activation(state: &mut MatchState, seat: usize, slot: usize) -> bool {
    if !state.settings.power_ups {
        return false;
    }
    let tick = state.tick;
    let Some(participant) = state.participants.get_mut(seat) else {
        return false;
    };
    if participant.eliminated {
        return false;
    }
    let Some(kind) = participant.slots.get_mut(slot).and_then(Option::take) else {
        return false;
    };
    participant.pending.push_back(kind);
    state.push_event(GameEvent::new(tick, GameEventData::PowerUpQueued { seat, kind }));
    true
}

/// Apply the seat's pending queue to the ball, in queue order.
pub fn apply_pending(state: &mut MatchState, seat: usize) {
    let Some(participant) = state.participants.get_mut(seat) else {
        return;
    };
    let queue: Vec<PowerUpKind> = participant.pending.drain(..).collect();

    for kind in queue {
        match kind {
            PowerUpKind::Curve => {
                let sign = state.rng.sign();
                state.ball.curve = Some(sign * CURVE_ACCELERATION);
            }
            PowerUpKind::Boost => {
                if state.ball.boost.is_none() {
                    state.ball.boost = Some(state.ball.speed());
                    state.ball.velocity = state.ball.velocity.scale(BOOST_FACTOR);
                }
            }
            PowerUpKind::Swarm => spawn_swarm(state),
        }
        let tick = state.tick;
        state.push_event(GameEvent::new(tick, GameEventData::PowerUpApplied { seat, kind }));
    }
}

/// Replace the swarm with a fan of clones around the ball's heading.
pub fn spawn_swarm(state: &mut MatchState) {
    let spread = if state.ball.curve.is_some() {
        SWARM_SPREAD * SWARM_CURVE_WIDENING
    } else {
        SWARM_SPREAD
    };
    let step = spread / (SWARM_SIZE.saturating_sub(1).max(1)) as f64;
    let velocity = state.ball.velocity;
    let position = state.ball.position;
    let curve = state.ball.curve;

    state.clones = (0..SWARM_SIZE)
        .map(|i| CloneBall {
            position,
            velocity: velocity.rotate(-spread / 2.0 + step * i as f64),
            curve,
        })
        .collect();
}

// =============================================================================
// EARNING
// =============================================================================

/// Hit-streak bookkeeping after a paddle hit.
///
/// Starts charging a random missing kind, or adds one charge to the current one.
pub fn register_hit(state: &mut MatchState, seat: usize) {
    let charging = match state.participants.get(seat) {
        Some(p) => p.charging,
        None => return,
    };
    match charging {
        None => start_charging(state, seat),
        Some(_) => add_charge(state, seat, 1),
    }
}

/// Grant charge directly (fruit pickups), starting a charge if needed.
pub fn grant_charge(state: &mut MatchState, seat: usize, amount: u32) {
    let idle = state.participants.get(seat).is_some_and(|p| p.charging.is_none());
    if idle {
        start_charging(state, seat);
    }
    add_charge(state, seat, amount);
}

fn start_charging(state: &mut MatchState, seat: usize) {
    let Some(participant) = state.participants.get(seat) else {
        return;
    };
    let missing: Vec<PowerUpKind> = PowerUpKind::ALL
        .iter()
        .copied()
        .filter(|kind| !participant.has_item(*kind))
        .collect();

    let choice = state.rng.choose(&missing).copied();
    if let (Some(kind), Some(participant)) = (choice, state.participants.get_mut(seat)) {
        participant.charging = Some(Charging { kind, charge: 0 });
    }
}

fn add_charge(state: &mut MatchState, seat: usize, amount: u32) {
    let tick = state.tick;
    let Some(participant) = state.participants.get_mut(seat) else {
        return;
    };
    let Some(charging) = participant.charging.as_mut() else {
        return;
    };

    charging.charge = charging.charge.saturating_add(amount);
    if charging.charge < CHARGE_THRESHOLD {
        return;
    }

    let kind = charging.kind;
    participant.charging = None;
    let slot = &mut participant.slots[kind.slot()];
    if slot.is_none() {
        *slot = Some(kind);
        state.push_event(GameEvent::new(tick, GameEventData::ItemAwarded { seat, kind }));
    }
}

// =============================================================================
// FRUITS
// =============================================================================

/// Advance the fruit timer and spawn a fruit when it elapses.
pub fn maybe_spawn_fruit(state: &mut MatchState, dt: f64) {
    if !state.settings.power_ups {
        return;
    }
    let Some(interval) = state.settings.fruit_frequency.interval_secs() else {
        return;
    };

    state.fruit_timer += dt;
    if state.fruit_timer < interval {
        return;
    }
    state.fruit_timer -= interval;
    if state.fruits.len() >= MAX_FRUITS {
        return;
    }

    let position = random_field_point(state);
    let id = state.next_fruit_id;
    state.next_fruit_id = state.next_fruit_id.wrapping_add(1);
    state.fruits.push(PowerUpFruit { id, position });

    let tick = state.tick;
    state.push_event(GameEvent::new(tick, GameEventData::FruitSpawned { fruit_id: id, position }));
}

/// Fruits touched by the ball go to whoever touched the ball last.
pub fn collect_fruits(state: &mut MatchState) {
    let Some(seat) = state.last_touch else {
        return;
    };
    let ball = state.ball.position;
    let radius = state.ball.radius;

    let (taken, kept): (Vec<PowerUpFruit>, Vec<PowerUpFruit>) = std::mem::take(&mut state.fruits)
        .into_iter()
        .partition(|f| circles_overlap(ball, radius, f.position, FRUIT_RADIUS));
    state.fruits = kept;

    for fruit in taken {
        grant_charge(state, seat, FRUIT_CHARGE);
        let tick = state.tick;
        state.push_event(GameEvent::new(tick, GameEventData::FruitCollected { seat, fruit_id: fruit.id }));
    }
}

/// A point well inside the arena, away from the paddles.
fn random_field_point(state: &mut MatchState) -> Vec2 {
    let center = state.arena.center();
    let reach = match &state.arena {
        crate::game::arena::Arena::Rectangle { width, height } => width.min(*height) * 0.3,
        crate::game::arena::Arena::Polygon { radius, .. } => radius * 0.5,
    };
    let angle = state.rng.next_range(0.0, std::f64::consts::TAU);
    let distance = state.rng.next_range(0.0, reach);
    center + Vec2::from_angle(angle).scale(distance)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::config::{FruitFrequency, MatchSettings};
    use crate::game::state::{Entrant, PlayerId};

    fn custom_match(n: usize) -> MatchState {
        let roster = (0..n)
            .map(|i| Entrant::human(PlayerId::new([i as u8 + 1; 16]), format!("p{i}")))
            .collect();
        MatchState::new([9; 16], 77, roster, MatchSettings::custom()).unwrap()
    }

    #[test]
    fn test_streak_awards_after_threshold() {
        let mut state = custom_match(2);
        register_hit(&mut state, 0);
        let kind = state.participants[0].charging.unwrap().kind;

        for _ in 0..CHARGE_THRESHOLD {
            register_hit(&mut state, 0);
        }
        assert!(state.participants[0].has_item(kind));
        assert!(state.participants[0].charging.is_none());
        assert!(state
            .take_events()
            .iter()
            .any(|e| matches!(e.data, GameEventData::ItemAwarded { seat: 0, .. })));
    }

    #[test]
    fn test_full_inventory_charges_nothing() {
        let mut state = custom_match(2);
        state.participants[0].slots = [Some(PowerUpKind::Curve), Some(PowerUpKind::Boost), Some(PowerUpKind::Swarm)];
        register_hit(&mut state, 0);
        assert!(state.participants[0].charging.is_none());
    }

    #[test]
    fn test_activation_moves_item_to_queue() {
        let mut state = custom_match(2);
        state.participants[1].slots[PowerUpKind::Boost.slot()] = Some(PowerUpKind::Boost);

        assert!(queue_activation(&mut state, 1, PowerUpKind::Boost.slot()));
        assert!(!state.participants[1].has_item(PowerUpKind::Boost));
        assert_eq!(state.participants[1].pending.front(), Some(&PowerUpKind::Boost));

        // Empty slot: nothing happens
        assert!(!queue_activation(&mut state, 1, PowerUpKind::Boost.slot()));
    }

    #[test]
    fn test_activation_ignored_without_power_ups() {
        let roster = vec![
            Entrant::human(PlayerId::new([1; 16]), "a"),
            Entrant::human(PlayerId::new([2; 16]), "b"),
        ];
        let mut state = MatchState::new([0; 16], 1, roster, MatchSettings::default()).unwrap();
        state.participants[0].slots[0] = Some(PowerUpKind::Curve);
        assert!(!queue_activation(&mut state, 0, 0));
    }

    #[test]
    fn test_apply_in_queue_order() {
        let mut state = custom_match(2);
        let speed = state.ball.speed();
        state.participants[0].pending.extend([PowerUpKind::Curve, PowerUpKind::Boost, PowerUpKind::Swarm]);

        apply_pending(&mut state, 0);

        assert!(state.ball.curve.is_some());
        assert_eq!(state.ball.boost, Some(speed));
        assert!((state.ball.speed() - speed * BOOST_FACTOR).abs() < 1e-9);
        assert_eq!(state.clones.len(), SWARM_SIZE);
        assert!(state.clones.iter().all(|c| c.curve == state.ball.curve));
        assert!(state.participants[0].pending.is_empty());
    }

    #[test]
    fn test_swarm_fan_widens_when_curving() {
        let mut state = custom_match(2);
        spawn_swarm(&mut state);
        let base = state.ball.velocity;
        let narrow = state.clones[0].velocity.normalize().dot(base.normalize());

        state.ball.curve = Some(CURVE_ACCELERATION);
        spawn_swarm(&mut state);
        let wide = state.clones[0].velocity.normalize().dot(base.normalize());

        // Wider fan means the outermost clone is further from the heading.
        assert!(wide < narrow);
    }

    #[test]
    fn test_fruit_grants_charge_to_last_toucher() {
        let mut state = custom_match(2);
        state.last_touch = Some(1);
        state.fruits.push(PowerUpFruit { id: 5, position: state.ball.position });

        collect_fruits(&mut state);

        assert!(state.fruits.is_empty());
        let charging = state.participants[1].charging.unwrap();
        assert_eq!(charging.charge, FRUIT_CHARGE);
    }

    #[test]
    fn test_fruit_ignored_without_toucher() {
        let mut state = custom_match(2);
        state.fruits.push(PowerUpFruit { id: 1, position: state.ball.position });
        collect_fruits(&mut state);
        assert_eq!(state.fruits.len(), 1);
    }

    #[test]
    fn test_fruit_spawn_cadence() {
        let mut state = custom_match(3);
        state.settings.fruit_frequency = FruitFrequency::High;
        for _ in 0..(60 * 4 - 1) {
            maybe_spawn_fruit(&mut state, 1.0 / 60.0);
        }
        assert!(state.fruits.is_empty());
        maybe_spawn_fruit(&mut state, 2.0 / 60.0);
        assert_eq!(state.fruits.len(), 1);
        assert!(state.arena.contains(state.fruits[0].position, 0.0));
    }
}
