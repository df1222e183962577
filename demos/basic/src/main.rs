#![deny(unsafe_op_in_unsafe_fn)]
use isr_timer::{Action, SlotId, TimerPool};
use isr_timer_port_std::{tick_count, TickDriver, TickDriverOptions};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

isr_timer_port_std::use_port!(unsafe struct SystemTraits);

static POOL: TimerPool<SystemTraits> = TimerPool::new();

static LED: AtomicBool = AtomicBool::new(false);
static DONE: AtomicBool = AtomicBool::new(false);

fn now() -> u32 {
    tick_count::<SystemTraits>()
}

fn blink() {
    let on = !LED.fetch_xor(true, Ordering::Relaxed);
    log::info!("[{:>5}] LED {}", now(), if on { "on" } else { "off" });
}

fn report(interval: usize) {
    log::info!("[{:>5}] {interval} ms timer fired", now());
}

fn pause_blinking(blink_id: usize) {
    log::info!("[{:>5}] toggling the blinker", now());
    POOL.toggle(SlotId::from_index(blink_id)).unwrap();
}

fn finish() {
    log::info!("[{:>5}] done", now());
    DONE.store(true, Ordering::Relaxed);
}

fn main() {
    env_logger::init();

    let driver = TickDriver::start(&POOL, TickDriverOptions::default());

    let blink_id = POOL.set_interval(250, Action::Nullary(blink)).unwrap();
    for interval in [700, 1100] {
        POOL.set_interval_with_param(interval, report, interval as usize)
            .unwrap();
    }
    POOL.set_timer_with_param(1500, pause_blinking, blink_id.index(), 2)
        .unwrap();
    POOL.set_timeout(5000, Action::Nullary(finish)).unwrap();

    log::trace!("POOL = {:#?}", POOL);
    log::info!(
        "{} timers running, {} slots free",
        POOL.count().unwrap(),
        POOL.available_count().unwrap()
    );

    while !DONE.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(10));
    }

    POOL.disable_all().unwrap();
    driver.stop();
}
