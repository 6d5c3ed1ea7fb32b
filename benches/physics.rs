//! Tick throughput for rectangle and polygon arenas.

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use paddle_arena::game::config::MatchSettings;
use paddle_arena::game::input::InputFrame;
use paddle_arena::game::state::{Entrant, MatchState, PlayerId};
use paddle_arena::game::tick::tick;

const DT: f64 = 1.0 / 60.0;

fn new_match(players: usize) -> MatchState {
    let entrants = (0..players)
        .map(|i| Entrant::human(PlayerId::new([i as u8 + 1; 16]), format!("p{i}")))
        .collect();
    let settings = MatchSettings { lives: 20, ..MatchSettings::custom() };
    match MatchState::new([7; 16], 1234, entrants, settings) {
        Ok(state) => state,
        Err(e) => panic!("bench roster rejected: {e}"),
    }
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    for players in [2usize, 4, 8, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(players), &players, |b, &players| {
            let mut state = new_match(players);
            let inputs: BTreeMap<PlayerId, InputFrame> = state
                .participants
                .iter()
                .enumerate()
                .map(|(i, p)| (p.id, InputFrame::from_parts(if i % 2 == 0 { 1 } else { -1 }, &[false; 3])))
                .collect();
            b.iter(|| {
                if state.is_ended() {
                    state = new_match(players);
                }
                black_box(tick(&mut state, &inputs, DT));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tick);
criterion_main!(benches);
