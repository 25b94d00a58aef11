use circuit_sim::sim::car::{AbilityStats, PitState};
use circuit_sim::sim::config::RaceConfig;
use circuit_sim::sim::geom::Vec2;
use circuit_sim::sim::physics;
use circuit_sim::sim::race::Race;
use circuit_sim::sim::track::Track;

/// 400 x 100 rectangle sampled every 10 units, starting on the top straight
fn rectangle_points() -> Vec<Vec2> {
    let mut points = Vec::new();
    for x in (10..=400).step_by(10) {
        points.push(Vec2::new(x as f32, 0.0));
    }
    for y in (10..=100).step_by(10) {
        points.push(Vec2::new(400.0, y as f32));
    }
    for x in (0..=390).rev().step_by(10) {
        points.push(Vec2::new(x as f32, 100.0));
    }
    for y in (0..=90).rev().step_by(10) {
        points.push(Vec2::new(0.0, y as f32));
    }
    points
}

fn rectangle_race() -> Race {
    let mut config = RaceConfig {
        car_count: 1,
        tick_rate: 1.0,
        ..RaceConfig::default()
    };
    config.track.start_fraction = 0.0;
    config.car.top_speed = 10.0;
    config.car.min_speed_fraction = 1.0;
    config.car.wear_rate = 0.0;
    let track = Track::from_polyline(&rectangle_points(), 400.0, 100.0, &config.track).unwrap();
    let tuning = config.car.clone();
    let mut race = Race::with_track(config, track).unwrap();
    race.cars[0].set_stats(AbilityStats::default(), &tuning);
    race
}

#[test]
fn rectangle_track_is_one_thousand_long() {
    let race = rectangle_race();
    assert_eq!(race.track.len(), 100);
    assert!((race.track.total_length() - 1000.0).abs() < 1e-3);
    assert_eq!(race.track.start_s(), 0.0);
    assert_eq!(race.track.straight().start, 0);
}

#[test]
fn car_wraps_and_counts_a_lap() {
    let mut race = rectangle_race();
    {
        let car = &mut race.cars[0];
        car.s = 990.0;
        car.lateral = 0.0;
        car.velocity = 10.0;
    }
    let lap_before = race.cars[0].lap;
    race.start();

    race.step();
    assert!(race.cars[0].s < 1e-3, "s = {}", race.cars[0].s);
    race.step();

    let car = &race.cars[0];
    assert!((car.s - 10.0).abs() < 1e-3, "s = {}", car.s);
    assert_eq!(car.lap, lap_before + 1);
}

#[test]
fn car_wanting_to_pit_claims_exactly_one_stall() {
    let mut race = Race::new(RaceConfig::default()).unwrap();
    let entry = race.pit.entry_track_index();
    let entry_s = race.track.sample(entry).arc_length + 1.0;
    let id = race.cars[0].id;
    send_to_pit(&mut race, id, entry_s);
    assert_eq!(race.pit.occupied_count(), 0);
    race.start();
    race.step();

    let car = race.car(id).unwrap();
    assert_eq!(car.pit_state, PitState::Entering);
    assert!(car.velocity <= car.coefficients.pit_speed);
    assert_eq!(race.pit.occupied_count(), 1);
    let stall = car.pit_stall.unwrap();
    assert_eq!(race.pit.stall(stall).unwrap().occupant, Some(id));
}

#[test]
fn car_past_the_last_stall_still_enters() {
    let mut race = Race::new(RaceConfig::default()).unwrap();
    let last = race.pit.stalls().last().unwrap().window_position;
    let index = race.pit.window_indices()[last + 1];
    assert!(race.pit.in_entry_zone(index));
    let id = race.cars[0].id;
    let s = race.track.sample(index).arc_length + 1.0;
    send_to_pit(&mut race, id, s);
    race.start();
    race.step();

    let car = race.car(id).unwrap();
    assert_eq!(car.pit_state, PitState::Entering);
    assert_eq!(race.pit.occupied_count(), 1);
    assert_eq!(race.pit.held_by(id), car.pit_stall);
}

fn send_to_pit(race: &mut Race, id: u32, s: f32) {
    let car = race.cars.iter_mut().find(|c| c.id == id).unwrap();
    car.s = s;
    car.lateral = 0.0;
    car.want_pit = true;
    car.velocity = car.coefficients.max_speed;
    physics::place(car, &race.track);
}

#[test]
fn servicing_runs_to_target_then_exits_and_rejoins() {
    let mut race = Race::new(RaceConfig::default()).unwrap();
    let dt_ms = race.config.dt() * 1000.0;
    let id = race.cars[0].id;
    let entry = race.pit.entry_track_index();
    let stall_index = race.pit.claim_stall(id, entry).unwrap();
    let stall = race.pit.stall(stall_index).unwrap().clone();
    {
        let car = race.car_mut(id).unwrap();
        car.pit_state = PitState::Servicing;
        car.pit_stall = Some(stall_index);
        car.s = stall.s;
        car.lateral = stall.lateral;
        car.pos = stall.pos;
        car.velocity = 0.0;
        car.energy = 0.2;
        car.pit_elapsed_ms = 0.0;
        car.pit_target_ms = 5000.0;
        car.want_pit = true;
        car.planned_pit_lap = Some(1);
        car.laps_since_pit = 4;
    }
    race.start();

    for tick in 1..=10 {
        race.step();
        let car = race.car(id).unwrap();
        assert_eq!(car.pit_state, PitState::Servicing);
        assert_eq!(car.velocity, 0.0);
        let expected = tick as f32 * dt_ms;
        assert!((car.pit_elapsed_ms - expected).abs() < 1e-2);
    }

    race.car_mut(id).unwrap().pit_elapsed_ms = 5000.0;
    race.step();
    let car = race.car(id).unwrap();
    assert_eq!(car.pit_state, PitState::Exiting);
    assert_eq!(car.energy, 1.0);
    assert!(!car.want_pit);
    assert_eq!(car.planned_pit_lap, None);
    assert_eq!(car.laps_since_pit, 0);

    let mut rejoined = false;
    for _ in 0..1200 {
        race.step();
        let car = race.car(id).unwrap();
        if car.pit_state == PitState::None {
            rejoined = true;
            assert!(car.velocity >= car.coefficients.min_speed);
            assert_eq!(car.pit_stall, None);
            break;
        }
        assert_eq!(car.pit_state, PitState::Exiting);
    }
    assert!(rejoined);
    assert_eq!(race.pit.occupied_count(), 0);
}

#[test]
fn tied_cars_rank_by_id_every_time() {
    let config = RaceConfig {
        car_count: 2,
        ..RaceConfig::default()
    };
    let mut race = Race::new(config).unwrap();
    let s = race.cars[0].s;
    for car in &mut race.cars {
        car.s = s;
        car.lap = 0;
    }
    for _ in 0..5 {
        let order = physics::ranking(&race.cars, &race.track);
        assert_eq!(order, vec![0, 1]);
    }

    race.cars.swap(0, 1);
    let order = physics::ranking(&race.cars, &race.track);
    assert_eq!(race.cars[order[0]].id, 0);
}

#[test]
fn same_seed_replays_identically() {
    let run = || {
        let mut race = Race::new(RaceConfig::default()).unwrap();
        race.start();
        for _ in 0..3000 {
            race.step();
        }
        serde_json::to_string(&race.snapshot()).unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn half_lap_line_produces_split_gaps() {
    let mut race = Race::new(RaceConfig::default()).unwrap();
    race.start();
    let mut gaps = Vec::new();
    for _ in 0..(120 * 60) {
        race.step();
        let snapshot = race.snapshot();
        let Some(leader) = snapshot.half_lap_leader else {
            continue;
        };
        gaps = snapshot
            .cars
            .iter()
            .filter(|c| c.id != leader)
            .filter_map(|c| c.half_lap_gap_ms)
            .collect();
        if !gaps.is_empty() {
            assert!(snapshot.half_lap_number >= 1);
            break;
        }
    }
    assert!(!gaps.is_empty());
    assert!(gaps.iter().all(|g| *g >= 0.0));
}

#[test]
fn long_race_completes_pit_stops_and_laps() {
    let mut race = Race::new(RaceConfig::default()).unwrap();
    race.start();
    let mut serviced = false;
    for _ in 0..(120 * 150) {
        race.step();
        serviced |= race
            .cars
            .iter()
            .any(|c| c.pit_state == PitState::Servicing);
    }
    assert!(serviced, "no car pitted in 150 s");
    assert!(race.cars.iter().all(|c| c.lap >= 2));
    assert!(race.cars.iter().any(|c| c.timing.best_lap_ms.is_some()));
}
