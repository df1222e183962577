//! Pool tests driven by a simulated time source
use quickcheck_macros::quickcheck;
use std::cell::{Cell, RefCell};

use crate::*;

thread_local! {
    static CPU_LOCK: Cell<bool> = Cell::new(false);
    static NOW: Cell<Ticks> = Cell::new(0);
    static FIRED: RefCell<Vec<usize>> = RefCell::new(Vec::new());
    static CURRENT_POOL: Cell<Option<&'static TestPool>> = Cell::new(None);
    static NESTED_RESULT: Cell<Option<Result<(), HandleTickError>>> = Cell::new(None);
}

/// A port whose state is local to the calling thread. Every test creates its
/// own pool, so the tests can run in parallel.
struct TestPort;

unsafe impl PortThreading for TestPort {
    unsafe fn enter_cpu_lock() {
        CPU_LOCK.with(|l| {
            assert!(!l.get());
            l.set(true);
        });
    }

    unsafe fn leave_cpu_lock() {
        CPU_LOCK.with(|l| {
            assert!(l.get());
            l.set(false);
        });
    }

    fn is_cpu_lock_active() -> bool {
        CPU_LOCK.with(Cell::get)
    }
}

impl PortTimer for TestPort {
    unsafe fn tick_count() -> Ticks {
        NOW.with(Cell::get)
    }
}

/// `TestPort` with a 24-bit counter.
struct NarrowTestPort;

unsafe impl PortThreading for NarrowTestPort {
    unsafe fn enter_cpu_lock() {
        unsafe { TestPort::enter_cpu_lock() }
    }

    unsafe fn leave_cpu_lock() {
        unsafe { TestPort::leave_cpu_lock() }
    }

    fn is_cpu_lock_active() -> bool {
        TestPort::is_cpu_lock_active()
    }
}

impl PortTimer for NarrowTestPort {
    const MAX_TICK_COUNT: Ticks = 0xff_ffff;

    unsafe fn tick_count() -> Ticks {
        NOW.with(Cell::get)
    }
}

type TestPool = TimerPool<TestPort, 4>;

fn set_now(t: Ticks) {
    NOW.with(|n| n.set(t));
}

fn advance_by<Port: PortTimer>(delta: Ticks) {
    let modulus = Port::MAX_TICK_COUNT as u64 + 1;
    NOW.with(|n| n.set(((n.get() as u64 + delta as u64) % modulus) as Ticks));
}

fn advance(delta: Ticks) {
    advance_by::<TestPort>(delta);
}

fn record(tag: usize) {
    log::trace!("fired {tag}");
    FIRED.with(|f| f.borrow_mut().push(tag));
}

fn take_fired() -> Vec<usize> {
    FIRED.with(|f| f.take())
}

fn noop() {}

const NONE: [usize; 0] = [];

/// Create a pool that callbacks can reach through [`current_pool`].
fn new_pool() -> &'static TestPool {
    let _ = env_logger::builder().is_test(true).try_init();
    set_now(0);
    take_fired();
    let pool: &'static TestPool = Box::leak(Box::new(TestPool::new()));
    CURRENT_POOL.with(|c| c.set(Some(pool)));
    pool
}

fn current_pool() -> &'static TestPool {
    CURRENT_POOL
        .with(Cell::get)
        .expect("no pool registered on this thread")
}

fn tick_at(pool: &TestPool, t: Ticks) -> Vec<usize> {
    set_now(t);
    pool.handle_tick().unwrap();
    take_fired()
}

#[test]
fn first_fit_admission() {
    let pool = new_pool();
    let ids: Vec<_> = (0..4)
        .map(|i| pool.set_interval_with_param(10, record, i).unwrap())
        .collect();
    assert_eq!(
        ids.iter().map(|id| id.index()).collect::<Vec<_>>(),
        [0, 1, 2, 3]
    );

    pool.remove(ids[3]).unwrap();
    pool.remove(ids[1]).unwrap();
    assert_eq!(pool.count(), Ok(2));
    assert_eq!(pool.available_count(), Ok(2));

    let id = pool.set_interval(10, Action::Nullary(noop)).unwrap();
    assert_eq!(id.index(), 1);
    let id = pool.set_interval(10, Action::Nullary(noop)).unwrap();
    assert_eq!(id.index(), 3);
    assert_eq!(pool.count(), Ok(4));
    assert_eq!(pool.available_count(), Ok(0));
}

#[test]
fn pool_exhaustion() {
    let pool = new_pool();
    assert_eq!(pool.capacity(), 4);
    for _ in 0..4 {
        pool.set_interval(10, Action::Nullary(noop)).unwrap();
    }
    assert_eq!(
        pool.set_interval(10, Action::Nullary(noop)),
        Err(AdmitTimerError::NoFreeSlot)
    );
    assert_eq!(pool.count(), Ok(4));
    assert_eq!(pool.available_count(), Ok(0));
}

#[test]
fn missing_callback() {
    let pool = new_pool();
    assert_eq!(
        pool.admit(10, None, Runs::Forever),
        Err(AdmitTimerError::InvalidCallback)
    );
    assert_eq!(pool.count(), Ok(0));
}

#[test]
fn periodic_schedule_reanchors() {
    let pool = new_pool();
    let id = pool.set_interval_with_param(100, record, 1).unwrap();

    assert_eq!(tick_at(pool, 99), NONE);
    assert_eq!(tick_at(pool, 100), [1]);

    // Late tick: the next period is measured from the actual firing time
    assert_eq!(tick_at(pool, 250), [1]);
    assert_eq!(pool.slot_info(id).unwrap().last_fire_time, 250);
    assert_eq!(tick_at(pool, 349), NONE);
    assert_eq!(tick_at(pool, 350), [1]);

    assert_eq!(pool.slot_info(id).unwrap().runs_so_far, 3);
}

#[test]
fn late_tick_fires_once() {
    let pool = new_pool();
    pool.set_interval_with_param(10, record, 1).unwrap();
    assert_eq!(tick_at(pool, 1000), [1]);
    assert_eq!(tick_at(pool, 1000), NONE);
}

#[test]
fn one_shot_frees_its_slot() {
    let pool = new_pool();
    pool.set_timeout_with_param(50, record, 7).unwrap();
    assert_eq!(tick_at(pool, 49), NONE);
    assert_eq!(tick_at(pool, 50), [7]);
    assert_eq!(pool.count(), Ok(0));
    assert_eq!(tick_at(pool, 200), NONE);
}

#[test]
fn run_budget() {
    let pool = new_pool();
    let id = pool.set_timer_with_param(10, record, 3, 3).unwrap();
    assert_eq!(pool.slot_info(id).unwrap().max_runs, Runs::Times(3));
    assert_eq!(tick_at(pool, 10), [3]);
    assert_eq!(tick_at(pool, 20), [3]);
    assert_eq!(pool.count(), Ok(1));
    assert_eq!(tick_at(pool, 30), [3]);
    assert_eq!(pool.count(), Ok(0));
    assert_eq!(tick_at(pool, 40), NONE);

    // `times == 0` means forever
    let id = pool.set_timer(10, Action::Unary(record, 4), 0).unwrap();
    assert_eq!(pool.slot_info(id).unwrap().max_runs, Runs::Forever);
}

#[test]
fn dispatch_in_index_order() {
    let pool = new_pool();
    for tag in [10, 11, 12] {
        pool.set_interval_with_param(5, record, tag).unwrap();
    }
    assert_eq!(tick_at(pool, 5), [10, 11, 12]);
}

#[test]
fn disabled_slot_keeps_schedule() {
    let pool = new_pool();
    let id = pool.set_interval_with_param(100, record, 1).unwrap();

    pool.disable(id).unwrap();
    assert_eq!(pool.is_enabled(id), Ok(false));
    assert_eq!(tick_at(pool, 150), NONE);
    assert_eq!(pool.slot_info(id).unwrap().last_fire_time, 0);
    assert_eq!(pool.count(), Ok(1));

    pool.enable(id).unwrap();
    assert_eq!(tick_at(pool, 150), [1]);
    assert_eq!(pool.slot_info(id).unwrap().last_fire_time, 150);
}

#[test]
fn toggle() {
    let pool = new_pool();
    let id = pool.set_interval(100, Action::Nullary(noop)).unwrap();
    assert_eq!(pool.is_enabled(id), Ok(true));
    pool.toggle(id).unwrap();
    assert_eq!(pool.is_enabled(id), Ok(false));
    pool.toggle(id).unwrap();
    assert_eq!(pool.is_enabled(id), Ok(true));
}

#[test]
fn enable_disable_all() {
    let pool = new_pool();
    let periodic = pool.set_interval_with_param(10, record, 1).unwrap();
    let limited = pool.set_timer_with_param(10, record, 2, 5).unwrap();

    pool.disable_all().unwrap();
    assert_eq!(pool.is_enabled(periodic), Ok(false));
    assert_eq!(pool.is_enabled(limited), Ok(false));
    assert_eq!(tick_at(pool, 10), NONE);

    pool.enable_all().unwrap();
    assert_eq!(pool.is_enabled(periodic), Ok(true));
    assert_eq!(pool.is_enabled(limited), Ok(true));
    assert_eq!(tick_at(pool, 10), [1, 2]);

    // Free slots stay free
    assert_eq!(pool.count(), Ok(2));
}

#[test]
fn change_interval_restarts_phase() {
    let pool = new_pool();
    let id = pool.set_interval_with_param(100, record, 1).unwrap();

    set_now(60);
    pool.change_interval(id, 50).unwrap();
    assert_eq!(pool.slot_info(id).unwrap().interval, 50);

    assert_eq!(tick_at(pool, 100), NONE);
    assert_eq!(tick_at(pool, 110), [1]);
}

#[test]
fn restart_keeps_interval() {
    let pool = new_pool();
    let id = pool.set_timer_with_param(100, record, 1, 2).unwrap();
    assert_eq!(tick_at(pool, 100), [1]);

    set_now(180);
    pool.restart(id).unwrap();
    let info = pool.slot_info(id).unwrap();
    assert_eq!(info.interval, 100);
    assert_eq!(info.runs_so_far, 1);
    assert_eq!(info.last_fire_time, 180);

    assert_eq!(tick_at(pool, 200), NONE);
    assert_eq!(tick_at(pool, 280), [1]);
    assert_eq!(pool.count(), Ok(0));
}

#[test]
fn unknown_slot() {
    let pool = new_pool();
    let out_of_range = SlotId::from_index(4);
    let free = SlotId::from_index(2);

    for id in [out_of_range, free] {
        assert_eq!(pool.change_interval(id, 1), Err(UpdateTimerError::NotFound));
        assert_eq!(pool.restart(id), Err(UpdateTimerError::NotFound));
        assert_eq!(pool.enable(id), Err(UpdateTimerError::NotFound));
        assert_eq!(pool.disable(id), Err(UpdateTimerError::NotFound));
        assert_eq!(pool.toggle(id), Err(UpdateTimerError::NotFound));
        assert_eq!(pool.is_enabled(id), Err(QueryTimerError::NotFound));
        assert_eq!(pool.slot_info(id), Err(QueryTimerError::NotFound));
    }

    assert_eq!(pool.remove(out_of_range), Err(RemoveTimerError::NotFound));
    assert_eq!(pool.remove(free), Ok(()));
    assert_eq!(pool.remove(free), Ok(()));
    assert_eq!(pool.available_count(), Ok(4));
}

#[test]
fn bad_context() {
    let pool = new_pool();
    let id = pool.set_interval(10, Action::Nullary(noop)).unwrap();

    unsafe { TestPort::enter_cpu_lock() };

    assert_eq!(
        pool.set_interval(10, Action::Nullary(noop)),
        Err(AdmitTimerError::BadContext)
    );
    assert_eq!(pool.enable(id), Err(UpdateTimerError::BadContext));
    assert_eq!(pool.is_enabled(id), Err(QueryTimerError::BadContext));
    assert_eq!(pool.remove(id), Err(RemoveTimerError::BadContext));
    assert_eq!(pool.count(), Err(PoolError::BadContext));
    assert_eq!(pool.init(), Err(PoolError::BadContext));
    assert_eq!(pool.handle_tick(), Err(HandleTickError::BadContext));
    assert!(format!("{pool:?}").contains("< locked >"));

    unsafe { TestPort::leave_cpu_lock() };

    assert_eq!(pool.count(), Ok(1));
    assert!(!format!("{pool:?}").contains("< locked >"));
}

#[test]
fn init_frees_all_slots() {
    let pool = new_pool();
    for tag in 0..4 {
        pool.set_interval_with_param(10, record, tag).unwrap();
    }
    pool.init().unwrap();
    assert_eq!(pool.count(), Ok(0));
    assert_eq!(pool.available_count(), Ok(4));
    assert_eq!(tick_at(pool, 100), NONE);
    assert_eq!(pool.set_interval(10, Action::Nullary(noop)).unwrap().index(), 0);
}

#[test]
fn full_range_wrap_around() {
    let pool = new_pool();
    set_now(Ticks::MAX - 9);
    pool.set_interval_with_param(20, record, 1).unwrap();

    advance(19);
    assert_eq!(pool.handle_tick(), Ok(()));
    assert_eq!(take_fired(), NONE);

    advance(1);
    assert_eq!(NOW.with(Cell::get), 10);
    pool.handle_tick().unwrap();
    assert_eq!(take_fired(), [1]);
}

#[test]
fn reduced_range_wrap_around() {
    let _ = env_logger::builder().is_test(true).try_init();
    take_fired();
    let pool = TimerPool::<NarrowTestPort, 2>::new();
    set_now(0xff_fff6);
    pool.set_interval_with_param(20, record, 1).unwrap();

    advance_by::<NarrowTestPort>(19);
    pool.handle_tick().unwrap();
    assert_eq!(take_fired(), NONE);

    advance_by::<NarrowTestPort>(1);
    assert_eq!(NOW.with(Cell::get), 10);
    pool.handle_tick().unwrap();
    assert_eq!(take_fired(), [1]);
}

#[test]
fn action_removes_later_slot() {
    fn remove_next(tag: usize) {
        record(tag);
        current_pool().remove(SlotId::from_index(1)).unwrap();
    }

    let pool = new_pool();
    pool.set_interval_with_param(10, remove_next, 0).unwrap();
    pool.set_interval_with_param(10, record, 1).unwrap();
    pool.set_interval_with_param(10, record, 2).unwrap();

    assert_eq!(tick_at(pool, 10), [0, 2]);
    assert_eq!(pool.count(), Ok(2));
}

#[test]
fn action_admits_timer() {
    fn admit_another(tag: usize) {
        record(tag);
        current_pool()
            .set_timeout_with_param(0, record, tag + 1)
            .unwrap();
    }

    let pool = new_pool();
    pool.set_timeout_with_param(10, admit_another, 0).unwrap();

    // The new slot is not examined until the next tick
    assert_eq!(tick_at(pool, 10), [0]);
    assert_eq!(pool.count(), Ok(1));
    assert_eq!(tick_at(pool, 10), [1]);
    assert_eq!(pool.count(), Ok(0));
}

#[test]
fn one_shot_readmitted_by_its_own_action() {
    fn rearm(tag: usize) {
        record(tag);
        let pool = current_pool();
        pool.remove(SlotId::from_index(0)).unwrap();
        let id = pool.set_timeout_with_param(10, record, tag + 1).unwrap();
        assert_eq!(id.index(), 0);
    }

    let pool = new_pool();
    pool.set_timeout_with_param(10, rearm, 0).unwrap();

    assert_eq!(tick_at(pool, 10), [0]);
    // The deferred deletion must leave the new timer alone
    assert_eq!(pool.count(), Ok(1));
    assert_eq!(tick_at(pool, 20), [1]);
    assert_eq!(pool.count(), Ok(0));
}

#[test]
fn action_runs_without_cpu_lock() {
    fn query() {
        assert!(!TestPort::is_cpu_lock_active());
        assert_eq!(current_pool().count(), Ok(1));
        record(0);
    }

    let pool = new_pool();
    pool.set_interval(10, Action::Nullary(query)).unwrap();
    assert_eq!(tick_at(pool, 10), [0]);
}

#[test]
fn nested_handle_tick() {
    fn reenter() {
        NESTED_RESULT.with(|r| r.set(Some(current_pool().handle_tick())));
    }

    let pool = new_pool();
    pool.set_timeout(10, Action::Nullary(reenter)).unwrap();
    pool.set_timeout_with_param(10, record, 1).unwrap();
    assert_eq!(tick_at(pool, 10), [1]);

    assert_eq!(
        NESTED_RESULT.with(Cell::take),
        Some(Err(HandleTickError::BadContext))
    );
    assert_eq!(pool.count(), Ok(0));

    // The outer call has finished; the pool accepts ticks again
    assert_eq!(pool.handle_tick(), Ok(()));
}

#[test]
fn panicking_action_leaves_pool_usable() {
    fn explode() {
        panic!("action failed");
    }

    let pool = new_pool();
    pool.set_timeout(10, Action::Nullary(explode)).unwrap();
    let periodic = pool.set_interval_with_param(10, record, 1).unwrap();

    set_now(10);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| pool.handle_tick()));
    assert!(result.is_err());
    assert!(!TestPort::is_cpu_lock_active());
    assert_eq!(take_fired(), NONE);

    // The one-shot timer is gone; the periodic one was not dispatched and
    // keeps its run budget
    assert_eq!(pool.count(), Ok(1));
    assert_eq!(pool.slot_info(periodic).unwrap().runs_so_far, 0);

    assert_eq!(tick_at(pool, 20), [1]);
    assert_eq!(pool.slot_info(periodic).unwrap().runs_so_far, 1);
}

#[test]
fn action_leaving_cpu_lock_active() {
    fn lock_and_return() {
        // Safety: CPU Lock inactive in an action
        unsafe { TestPort::enter_cpu_lock() };
        record(0);
    }

    let pool = new_pool();
    pool.set_timeout(10, Action::Nullary(lock_and_return)).unwrap();
    pool.set_timeout_with_param(10, record, 1).unwrap();

    // The pool takes over CPU Lock, keeps dispatching, and leaves it at the end
    assert_eq!(tick_at(pool, 10), [0, 1]);
    assert!(!TestPort::is_cpu_lock_active());
    assert_eq!(pool.count(), Ok(0));
}

#[test]
fn slot_info_snapshot() {
    let pool = new_pool();
    set_now(5);
    let id = pool.set_timer(30, Action::Nullary(noop), 4).unwrap();
    pool.disable(id).unwrap();
    assert_eq!(
        pool.slot_info(id),
        Ok(SlotInfo {
            interval: 30,
            max_runs: Runs::Times(4),
            runs_so_far: 0,
            enabled: false,
            last_fire_time: 5,
        })
    );
}

#[test]
fn default_capacity() {
    let pool: TimerPool<TestPort> = TimerPool::new();
    assert_eq!(pool.capacity(), DEFAULT_NUM_SLOTS);
    assert_eq!(pool.available_count(), Ok(DEFAULT_NUM_SLOTS));

    let pool = TimerPool::<TestPort, MAX_NUM_SLOTS>::new();
    assert_eq!(pool.available_count(), Ok(MAX_NUM_SLOTS));
    for i in 0..MAX_NUM_SLOTS {
        let id = pool.set_interval(1, Action::Nullary(noop)).unwrap();
        assert_eq!(id.index(), i);
    }
    assert_eq!(
        pool.set_interval(1, Action::Nullary(noop)),
        Err(AdmitTimerError::NoFreeSlot)
    );
}

/// A reference implementation of [`TimerPool`] without actions.
#[derive(Debug, Clone, Copy)]
struct ModelSlot {
    tag: usize,
    last_fire_time: Ticks,
    interval: Ticks,
    max_runs: u32,
    runs_so_far: u32,
    enabled: bool,
}

#[derive(Debug, Default)]
struct Model {
    slots: [Option<ModelSlot>; 4],
    now: Ticks,
}

impl Model {
    fn admit(&mut self, tag: usize, interval: Ticks, max_runs: u32) -> Result<usize, AdmitTimerError> {
        let now = self.now;
        let (i, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.is_none())
            .ok_or(AdmitTimerError::NoFreeSlot)?;
        *slot = Some(ModelSlot {
            tag,
            last_fire_time: now,
            interval,
            max_runs,
            runs_so_far: 0,
            enabled: true,
        });
        Ok(i)
    }

    fn slot_mut(&mut self, i: usize) -> Result<&mut ModelSlot, UpdateTimerError> {
        self.slots
            .get_mut(i)
            .and_then(Option::as_mut)
            .ok_or(UpdateTimerError::NotFound)
    }

    fn tick(&mut self) -> Vec<usize> {
        let now = self.now;
        let mut fired = Vec::new();
        for entry in self.slots.iter_mut() {
            let Some(slot) = entry else { continue };
            if !slot.enabled || now.wrapping_sub(slot.last_fire_time) < slot.interval {
                continue;
            }
            slot.last_fire_time = now;
            slot.runs_so_far += 1;
            fired.push(slot.tag);
            if slot.max_runs != 0 && slot.runs_so_far >= slot.max_runs {
                *entry = None;
            }
        }
        fired
    }
}

/// An operation applied to both the pool and [`Model`].
#[derive(Debug)]
enum Cmd {
    Admit { interval: Ticks, times: u32 },
    Remove(usize),
    Toggle(usize),
    ChangeInterval(usize, Ticks),
    Restart(usize),
    Tick(Ticks),
}

/// Map random bytes to operations. Slot indices may exceed the capacity.
fn interpret(bytecode: &[(u8, u8, u8)]) -> impl Iterator<Item = Cmd> + '_ {
    bytecode.iter().map(|&(op, a, b)| match op % 8 {
        0 | 1 => Cmd::Admit {
            interval: a as Ticks % 64,
            times: b as u32 % 4,
        },
        2 => Cmd::Remove(a as usize % 6),
        3 => Cmd::Toggle(a as usize % 6),
        4 => Cmd::ChangeInterval(a as usize % 6, b as Ticks % 64),
        5 => Cmd::Restart(a as usize % 6),
        _ => Cmd::Tick(a as Ticks % 80),
    })
}

#[quickcheck]
fn matches_model(bytecode: Vec<(u8, u8, u8)>) {
    let pool = new_pool();
    let mut model = Model::default();
    let mut next_tag = 0;

    for cmd in interpret(&bytecode) {
        log::trace!("    {cmd:?}");
        match cmd {
            Cmd::Admit { interval, times } => {
                let tag = next_tag;
                next_tag += 1;
                assert_eq!(
                    pool.set_timer_with_param(interval, record, tag, times)
                        .map(SlotId::index),
                    model.admit(tag, interval, times),
                );
            }
            Cmd::Remove(i) => {
                let expected = if i < 4 {
                    model.slots[i] = None;
                    Ok(())
                } else {
                    Err(RemoveTimerError::NotFound)
                };
                assert_eq!(pool.remove(SlotId::from_index(i)), expected);
            }
            Cmd::Toggle(i) => {
                let expected = model.slot_mut(i).map(|s| s.enabled = !s.enabled);
                assert_eq!(pool.toggle(SlotId::from_index(i)), expected);
            }
            Cmd::ChangeInterval(i, interval) => {
                let now = model.now;
                let expected = model.slot_mut(i).map(|s| {
                    s.interval = interval;
                    s.last_fire_time = now;
                });
                assert_eq!(
                    pool.change_interval(SlotId::from_index(i), interval),
                    expected
                );
            }
            Cmd::Restart(i) => {
                let now = model.now;
                let expected = model.slot_mut(i).map(|s| s.last_fire_time = now);
                assert_eq!(pool.restart(SlotId::from_index(i)), expected);
            }
            Cmd::Tick(delta) => {
                model.now = model.now.wrapping_add(delta);
                advance(delta);
                pool.handle_tick().unwrap();
                assert_eq!(take_fired(), model.tick());
            }
        }

        let num_used = model.slots.iter().filter(|s| s.is_some()).count();
        assert_eq!(pool.count(), Ok(num_used));
        assert_eq!(pool.available_count(), Ok(4 - num_used));
    }
}
