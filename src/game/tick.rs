//! Authoritative Simulation Tick
//!
//! Advances one match by one fixed step: inputs, integration, paddle hits,
//! walls and scoring, clone swarm, fruits, terminal check. Pure function of
//! (state, inputs, elapsed); randomness comes only from `state.rng`.

use std::collections::BTreeMap;

use crate::core::vec2::Vec2;
use crate::game::arena::Arena;
use crate::game::collision::{
    bounce_rect_walls, corner_bounce, paddle_bounce, paddle_contact, reflect_off_side, PaddleContact,
};
use crate::game::config::SPIN_PER_UNIT;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::input::InputFrame;
use crate::game::powerup;
use crate::game::state::{MatchState, Participant, PlayerId};

/// Largest step accepted, so a stalled timer cannot teleport the ball.
pub const MAX_STEP_SECS: f64 = 0.1;

/// Result of a tick.
#[derive(Debug)]
#[derive(Default)]
pub struct TickResult {
    /// Events generated this tick
    pub events: Vec<GameEvent>,
    /// Whether match ended this tick (or earlier)
    pub match_ended: bool,
    /// Winner (if match ended with winner)
    pub winner: Option<PlayerId>,
}

/// Run one simulation tick.
///
/// # Arguments
///
/// * `state` - The match state (will be mutated)
/// * `inputs` - Edge-filtered inputs for this tick (BTreeMap for deterministic order)
/// * `elapsed` - Seconds since the previous tick
pub fn tick(
    state: &mut MatchState,
    inputs: &BTreeMap<PlayerId, InputFrame>,
    elapsed: f64,
) -> TickResult {
    let mut result = TickResult::default();

    if state.is_ended() {
        result.match_ended = true;
        result.winner = winner_id(state);
        return result;
    }

    // 0. Advance tick counter
    state.tick += 1;
    let dt = sanitize_step(elapsed);

    // 1. Apply player inputs
    apply_inputs(state, inputs, dt);

    // 2. Integrate ball
    let previous = state.ball.position;
    integrate_ball(state, dt);

    // 3. Paddle hits
    resolve_paddles(state, previous);

    // 4. Walls and scoring
    match state.arena {
        Arena::Rectangle { .. } => resolve_rectangle(state),
        Arena::Polygon { .. } => resolve_polygon(state),
    }

    // 5. Clone swarm
    update_clones(state, dt);

    // 6. Fruits
    powerup::collect_fruits(state);
    powerup::maybe_spawn_fruit(state, dt);

    // 7. Check end conditions
    check_end_conditions(state, &mut result);

    #[cfg(feature = "debug-tracing")]
    tracing::trace!(
        tick = state.tick,
        ball = %state.ball.position,
        speed = state.ball.speed(),
        clones = state.clones.len(),
        "tick"
    );

    // Collect events
    result.events = state.take_events();

    result
}

/// Remove a seat from play (disconnect or surrender).
///
/// The simulation keeps running for the others; the match ends if at most
/// one participant is left.
pub fn forfeit(state: &mut MatchState, seat: usize) -> TickResult {
    let mut result = TickResult::default();

    if !state.is_ended() {
        if let Some(placement) = state.eliminate(seat) {
            let tick = state.tick;
            state.push_event(GameEvent::new(tick, GameEventData::Eliminated { seat, placement }));
        }
    }

    check_end_conditions(state, &mut result);
    result.events = state.take_events();
    result
}

fn sanitize_step(elapsed: f64) -> f64 {
    if !elapsed.is_finite() || elapsed <= 0.0 {
        return 0.0;
    }
    elapsed.min(MAX_STEP_SECS)
}

fn winner_id(state: &MatchState) -> Option<PlayerId> {
    state
        .winner
        .and_then(|seat| state.participants.get(seat))
        .map(|p| p.id)
}

// =============================================================================
// INPUT
// =============================================================================

/// Apply movement and slot activations.
fn apply_inputs(state: &mut MatchState, inputs: &BTreeMap<PlayerId, InputFrame>, dt: f64) {
    let mut activations: Vec<(usize, usize)> = Vec::new();

    // BTreeMap iterates in sorted key order
    for (player_id, input) in inputs {
        let Some(seat) = state.seat_of(player_id) else {
            continue;
        };
        let participant = &mut state.participants[seat];
        if participant.eliminated {
            continue;
        }

        participant.paddle.step(input.direction, dt, &state.arena);

        for slot in 0..InputFrame::SLOTS {
            if input.slot_pressed(slot) {
                activations.push((seat, slot));
            }
        }
    }

    // Stop paddles with no input this tick
    for participant in state.participants.iter_mut() {
        if !inputs.contains_key(&participant.id) {
            participant.paddle.velocity = 0.0;
        }
    }

    for (seat, slot) in activations {
        powerup::queue_activation(state, seat, slot);
    }
}

// =============================================================================
// BALL
// =============================================================================

fn integrate_ball(state: &mut MatchState, dt: f64) {
    let ball = &mut state.ball;
    let speed = ball.speed();

    if let Some(acceleration) = ball.curve {
        let lateral = ball.velocity.normalize().perpendicular().scale(acceleration * dt);
        ball.velocity = (ball.velocity + lateral).with_length(speed);
    }

    ball.position = ball.position + ball.velocity.scale(dt);
    ball.rotation = (ball.rotation + speed * dt * SPIN_PER_UNIT).rem_euclid(std::f64::consts::TAU);
}

fn resolve_paddles(state: &mut MatchState, previous: Vec2) {
    let hit = state
        .participants
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_alive())
        .find_map(|(seat, p)| paddle_contact(previous, &state.ball, &p.paddle).map(|c| (seat, c)));

    if let Some((seat, contact)) = hit {
        on_paddle_hit(state, seat, contact);
    }
}

/// Bounce, clear transient state, then run the hitter's power-up logic.
fn on_paddle_hit(state: &mut MatchState, seat: usize, contact: PaddleContact) {
    let normal = state.participants[seat].paddle.normal;

    state.ball.clear_modifiers();
    state.clones.clear();
    state.ball.velocity = paddle_bounce(
        state.ball.velocity,
        normal,
        contact.offset,
        state.ball.speed_increment,
    );
    state.ball.position = contact.position;
    state.last_touch = Some(seat);
    state.participants[seat].hits += 1;

    let tick = state.tick;
    let speed = state.ball.speed();
    state.push_event(GameEvent::new(tick, GameEventData::PaddleHit { seat, speed }));

    if state.settings.power_ups {
        powerup::apply_pending(state, seat);
        powerup::register_hit(state, seat);
    }
}

fn resolve_rectangle(state: &mut MatchState) {
    let Arena::Rectangle { width, height } = state.arena else {
        return;
    };
    let radius = state.ball.radius;

    if let Some((position, velocity)) =
        bounce_rect_walls(state.ball.position, state.ball.velocity, radius, height)
    {
        state.ball.position = position;
        state.ball.velocity = velocity;
        let tick = state.tick;
        state.push_event(GameEvent::new(tick, GameEventData::WallBounce { position }));
    }

    // Ball fully past a goal line costs that side a life.
    let x = state.ball.position.x;
    if x + radius < 0.0 {
        lose_life(state, 0);
    } else if x - radius > width {
        lose_life(state, 1);
    }
}

fn resolve_polygon(state: &mut MatchState) {
    let Arena::Polygon { vertices, sides, corner_radius, .. } = &state.arena else {
        return;
    };
    let radius = state.ball.radius;
    let mut position = state.ball.position;
    let mut velocity = state.ball.velocity;
    let mut bounced = false;

    // Corner dead-zones rebound off the vertex as a point.
    for vertex in vertices {
        if let Some((p, v)) = corner_bounce(position, velocity, *vertex, corner_radius + radius) {
            position = p;
            velocity = v;
            bounced = true;
            break;
        }
    }

    // Eliminated sides are solid; live sides are goals.
    let mut crossed: Option<(usize, f64)> = None;
    for (i, side) in sides.iter().enumerate() {
        let depth = side.signed_distance(position);
        let owner_alive = state.participants.get(i).is_some_and(Participant::is_alive);

        if !owner_alive {
            if depth < radius && velocity.dot(side.inward_normal) < 0.0 {
                velocity = reflect_off_side(velocity, side.inward_normal);
                position = position + side.inward_normal.scale(radius - depth);
                bounced = true;
            }
        } else if depth < -radius && crossed.is_none_or(|(_, d)| depth < d) {
            crossed = Some((i, depth));
        }
    }

    let escaped = !state.arena.contains(position, radius * 4.0);

    state.ball.position = position;
    state.ball.velocity = velocity;
    if bounced {
        let tick = state.tick;
        state.push_event(GameEvent::new(tick, GameEventData::WallBounce { position }));
    }

    if let Some((seat, _)) = crossed {
        lose_life(state, seat);
    } else if escaped {
        // Left through a gap no rule covers; re-serve without scoring.
        state.serve();
    }
}

/// Charge a life to `seat`, eliminate at zero, and re-serve.
fn lose_life(state: &mut MatchState, seat: usize) {
    let tick = state.tick;
    let Some(participant) = state.participants.get_mut(seat) else {
        return;
    };
    participant.lives = participant.lives.saturating_sub(1);
    let lives_remaining = participant.lives;
    state.push_event(GameEvent::new(tick, GameEventData::LifeLost { seat, lives_remaining }));

    if lives_remaining == 0 {
        if let Some(placement) = state.eliminate(seat) {
            state.push_event(GameEvent::new(tick, GameEventData::Eliminated { seat, placement }));
        }
    }

    for p in state.participants.iter_mut() {
        p.pending.clear();
    }
    state.last_touch = None;
    state.serve_sign = -state.serve_sign;
    state.serve();
}

// =============================================================================
// CLONES
// =============================================================================

/// Clones bounce off walls, vanish outside the arena and never score.
fn update_clones(state: &mut MatchState, dt: f64) {
    if state.clones.is_empty() {
        return;
    }
    let radius = state.ball.radius;
    let arena = &state.arena;
    let participants = &state.participants;
    let mut bounces: Vec<Vec2> = Vec::new();

    state.clones.retain_mut(|clone| {
        if let Some(acceleration) = clone.curve {
            let speed = clone.velocity.length();
            let lateral = clone.velocity.normalize().perpendicular().scale(acceleration * dt);
            clone.velocity = (clone.velocity + lateral).with_length(speed);
        }
        clone.position = clone.position + clone.velocity.scale(dt);

        match arena {
            Arena::Rectangle { height, .. } => {
                if let Some((p, v)) = bounce_rect_walls(clone.position, clone.velocity, radius, *height) {
                    clone.position = p;
                    clone.velocity = v;
                    bounces.push(p);
                }
            }
            Arena::Polygon { vertices, sides, corner_radius, .. } => {
                for vertex in vertices {
                    if let Some((p, v)) = corner_bounce(clone.position, clone.velocity, *vertex, corner_radius + radius) {
                        clone.position = p;
                        clone.velocity = v;
                        break;
                    }
                }
                for (i, side) in sides.iter().enumerate() {
                    if participants.get(i).is_some_and(Participant::is_alive) {
                        continue;
                    }
                    let depth = side.signed_distance(clone.position);
                    if depth < radius && clone.velocity.dot(side.inward_normal) < 0.0 {
                        clone.velocity = reflect_off_side(clone.velocity, side.inward_normal);
                        clone.position = clone.position + side.inward_normal.scale(radius - depth);
                    }
                }
            }
        }

        arena.contains(clone.position, radius)
    });

    let tick = state.tick;
    for position in bounces {
        state.push_event(GameEvent::new(tick, GameEventData::WallBounce { position }));
    }
}

// =============================================================================
// END CONDITIONS
// =============================================================================

fn check_end_conditions(state: &mut MatchState, result: &mut TickResult) {
    let already_ended = state.is_ended();
    if !state.check_terminal() {
        return;
    }
    if !already_ended {
        let tick = state.tick;
        let winner = state.winner;
        state.push_event(GameEvent::new(
            tick,
            GameEventData::MatchEnded { winner, duration_ticks: tick },
        ));
    }
    result.match_ended = true;
    result.winner = winner_id(state);
}

// =============================================================================
// TESTS
// =============================================================================
