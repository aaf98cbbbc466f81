//! Random change sequences must leave the incremental score equal to a rebuild,
//! whichever joiner planner compiled the network.

use proptest::prelude::*;
use proptest::sample::Index;
use scorenet::prelude::*;
use scorenet::{IndexedJoinerPlanner, JoinerPlanner, UnindexedJoinerPlanner};
use std::cell::Cell;

#[derive(Debug)]
struct Lesson {
    room: Cell<i64>,
    size: Cell<i64>,
}
impl_fact!(Lesson);

#[derive(Debug)]
struct Room {
    id: Cell<i64>,
    capacity: Cell<i64>,
}
impl_fact!(Room);

#[derive(Debug, Clone)]
enum Op {
    InsertLesson { room: i64, size: i64 },
    InsertRoom { id: i64, capacity: i64 },
    UpdateLesson { pick: Index, room: i64, size: i64 },
    UpdateRoom { pick: Index, id: i64, capacity: i64 },
    RetractLesson(Index),
    RetractRoom(Index),
    Settle,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0i64..4, 1i64..6).prop_map(|(room, size)| Op::InsertLesson { room, size }),
        2 => (0i64..4, 1i64..6).prop_map(|(id, capacity)| Op::InsertRoom { id, capacity }),
        3 => (any::<Index>(), 0i64..4, 1i64..6).prop_map(|(pick, room, size)| Op::UpdateLesson { pick, room, size }),
        2 => (any::<Index>(), 0i64..4, 1i64..6).prop_map(|(pick, id, capacity)| Op::UpdateRoom { pick, id, capacity }),
        2 => any::<Index>().prop_map(Op::RetractLesson),
        1 => any::<Index>().prop_map(Op::RetractRoom),
        1 => Just(Op::Settle),
    ]
}

fn lesson_room(t: &AnyTuple) -> Option<i64> {
    t.get::<Lesson>(0).map(|l| l.room.get())
}

fn lesson_size(t: &AnyTuple) -> Option<i64> {
    t.get::<Lesson>(0).map(|l| l.size.get())
}

fn room_id(t: &AnyTuple) -> Option<i64> {
    t.get::<Room>(0).map(|r| r.id.get())
}

fn fits(lesson: &AnyTuple, room: &AnyTuple) -> bool {
    match (lesson.get::<Lesson>(0), room.get::<Room>(0)) {
        (Some(l), Some(r)) => r.capacity.get() >= l.size.get(),
        _ => false,
    }
}

fn session_with(planner: Rc<dyn JoinerPlanner>) -> Session<HardSoftScore> {
    let builder = ConstraintBuilder::<HardSoftScore>::new().with_joiner_planner(planner);
    builder
        .constraint("Room conflict", HardSoftScore::ONE_HARD, || {
            builder
                .for_each_unique_pair::<Lesson>(vec![Joiners::equal(lesson_room, lesson_room)])
                .penalize()
        })
        .constraint("Smaller neighbour", HardSoftScore::ONE_SOFT, || {
            builder
                .for_each::<Lesson>()
                .join(
                    builder.for_each::<Lesson>(),
                    vec![
                        Joiners::equal(lesson_room, lesson_room),
                        Joiners::less_than(lesson_size, lesson_size),
                    ],
                )
                .penalize()
        })
        .constraint("No fitting room", HardSoftScore::ONE_HARD, || {
            builder
                .for_each::<Lesson>()
                .if_not_exists(
                    builder.for_each::<Room>(),
                    vec![Joiners::equal(lesson_room, room_id), Joiners::filtering(fits)],
                )
                .penalize_by(|t| lesson_size(t).unwrap_or_default())
        })
        .constraint("Known room", HardSoftScore::ONE_SOFT, || {
            builder
                .for_each::<Lesson>()
                .if_exists(builder.for_each::<Room>(), vec![Joiners::equal(lesson_room, room_id)])
                .reward()
        })
        .constraint("Room load", HardSoftScore::ONE_SOFT, || {
            builder
                .for_each::<Lesson>()
                .group_by_key(lesson_room, Collectors::sum(|t: &AnyTuple| lesson_size(t).unwrap_or_default()))
                .penalize_by(|t| t.get::<i64>(1).map_or(0, |load| load * load))
        })
        .constraint("Spare seats", HardSoftScore::ONE_SOFT, || {
            builder
                .for_each::<Lesson>()
                .join(builder.for_each::<Room>(), vec![Joiners::equal(lesson_room, room_id)])
                .map(|t| {
                    let spare = match (t.get::<Lesson>(0), t.get::<Room>(1)) {
                        (Some(l), Some(r)) => r.capacity.get() - l.size.get(),
                        _ => 0,
                    };
                    Rc::new(spare) as Rc<dyn Fact>
                })
                .filter(|spare: &i64| *spare > 0)
                .reward_by(|t| t.get::<i64>(0).copied().unwrap_or_default())
        })
        .constraint("Odd seats", HardSoftScore::ONE_SOFT, || {
            builder
                .for_each::<Lesson>()
                .flat_map(|t| {
                    let size = lesson_size(t).unwrap_or_default();
                    (0..size).filter(|seat| seat % 2 == 1).map(|seat| Rc::new(seat) as Rc<dyn Fact>).collect()
                })
                .penalize()
        })
        .constraint("Used rooms", HardSoftScore::ONE_SOFT, || {
            builder
                .for_each::<Lesson>()
                .map(|t| Rc::new(lesson_room(t).unwrap_or_default()) as Rc<dyn Fact>)
                .distinct()
                .penalize()
        })
        .constraint("Seat balance", HardSoftScore::ONE_SOFT, || {
            builder
                .for_each::<Lesson>()
                .map(|t| Rc::new(-lesson_size(t).unwrap_or_default()) as Rc<dyn Fact>)
                .concat(
                    builder
                        .for_each::<Room>()
                        .map(|t| Rc::new(t.get::<Room>(0).map_or(0, |r| r.capacity.get())) as Rc<dyn Fact>),
                )
                .impact_by(|t| t.get::<i64>(0).copied().unwrap_or_default())
        });
    builder
        .build_session(SessionConfig::default().with_strict_assertions())
        .unwrap()
}

struct Harness {
    indexed: Session<HardSoftScore>,
    unindexed: Session<HardSoftScore>,
    lessons: Vec<Rc<Lesson>>,
    rooms: Vec<Rc<Room>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            indexed: session_with(Rc::new(IndexedJoinerPlanner)),
            unindexed: session_with(Rc::new(UnindexedJoinerPlanner)),
            lessons: Vec::new(),
            rooms: Vec::new(),
        }
    }

    fn apply(&mut self, op: &Op) -> Result<()> {
        match op {
            Op::InsertLesson { room, size } => {
                let lesson = Rc::new(Lesson {
                    room: Cell::new(*room),
                    size: Cell::new(*size),
                });
                self.indexed.insert(Rc::clone(&lesson))?;
                self.unindexed.insert(Rc::clone(&lesson))?;
                self.lessons.push(lesson);
            }
            Op::InsertRoom { id, capacity } => {
                let room = Rc::new(Room {
                    id: Cell::new(*id),
                    capacity: Cell::new(*capacity),
                });
                self.indexed.insert(Rc::clone(&room))?;
                self.unindexed.insert(Rc::clone(&room))?;
                self.rooms.push(room);
            }
            Op::UpdateLesson { pick, room, size } if !self.lessons.is_empty() => {
                let lesson = &self.lessons[pick.index(self.lessons.len())];
                lesson.room.set(*room);
                lesson.size.set(*size);
                self.indexed.update(lesson)?;
                self.unindexed.update(lesson)?;
            }
            Op::UpdateRoom { pick, id, capacity } if !self.rooms.is_empty() => {
                let room = &self.rooms[pick.index(self.rooms.len())];
                room.id.set(*id);
                room.capacity.set(*capacity);
                self.indexed.update(room)?;
                self.unindexed.update(room)?;
            }
            Op::RetractLesson(pick) if !self.lessons.is_empty() => {
                let lesson = self.lessons.swap_remove(pick.index(self.lessons.len()));
                self.indexed.retract(&lesson)?;
                self.unindexed.retract(&lesson)?;
            }
            Op::RetractRoom(pick) if !self.rooms.is_empty() => {
                let room = self.rooms.swap_remove(pick.index(self.rooms.len()));
                self.indexed.retract(&room)?;
                self.unindexed.retract(&room)?;
            }
            Op::Settle => {
                self.indexed.settle()?;
                self.unindexed.settle()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn check(&mut self) -> std::result::Result<(), TestCaseError> {
        let indexed = self.indexed.assert_score_consistent().map_err(|e| TestCaseError::fail(e.to_string()))?;
        let unindexed = self.unindexed.calculate_score().map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(indexed, unindexed);
        let stats = self.indexed.stats();
        prop_assert_eq!(stats.dirty_tuples, 0);
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn incremental_score_matches_rebuild(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut harness = Harness::new();
        for op in &ops {
            harness.apply(op).map_err(|e| TestCaseError::fail(e.to_string()))?;
            if matches!(op, Op::Settle) {
                harness.check()?;
            }
        }
        harness.check()?;
    }

    #[test]
    fn retracting_everything_returns_to_zero(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let mut harness = Harness::new();
        for op in &ops {
            harness.apply(op).map_err(|e| TestCaseError::fail(e.to_string()))?;
        }
        let lessons = std::mem::take(&mut harness.lessons);
        let rooms = std::mem::take(&mut harness.rooms);
        for lesson in &lessons {
            harness.indexed.retract(lesson).map_err(|e| TestCaseError::fail(e.to_string()))?;
        }
        for room in &rooms {
            harness.indexed.retract(room).map_err(|e| TestCaseError::fail(e.to_string()))?;
        }
        let score = harness.indexed.calculate_score().map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(score, HardSoftScore::ZERO);
        let stats = harness.indexed.stats();
        prop_assert_eq!(stats.live_tuples + stats.dirty_tuples, 0);
    }
}
