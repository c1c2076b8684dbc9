//! Cooperative super-loop scheduler.
//!
//! Tasks are registered with their declared dependencies and resolved once
//! into a fixed execution order (dependencies first, otherwise registration
//! order). Initialization runs each task's `initialize` exactly once in that
//! order with the system `initializing` flag set; every loop pass then feeds
//! the watchdog, checks the previous pass against the loop budget, runs each
//! task's active state once and sleeps until the next tick.
//!
//! Overruns are only detected and flagged. Nothing is preempted.

use heapless::Vec;

use crate::config::{LOOP_BUDGET_MS, MAX_TASKS};
use crate::diagnostics::StatusReport;
use crate::hal::power::Sleep;
use crate::hal::watchdog::Feed;
use crate::os::{is_time_up, System};
use crate::rtos::task::{Task, TaskId};
use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulerError {
    /// `MAX_TASKS` already registered
    Full,
    /// Two tasks share an id
    Duplicate(TaskId),
    /// A declared dependency was never registered
    MissingDependency { task: TaskId, dependency: TaskId },
    /// Dependencies form a cycle through this task
    DependencyCycle(TaskId),
}

pub struct Scheduler<'a> {
    tasks: Vec<&'a dyn Task, MAX_TASKS>,
    order: Vec<usize, MAX_TASKS>,
    last_pass_ms: Option<u32>,
    passes: u32,
    overruns: u32,
}

impl<'a> Scheduler<'a> {
    pub const fn new() -> Self {
        Self {
            tasks: Vec::new(),
            order: Vec::new(),
            last_pass_ms: None,
            passes: 0,
            overruns: 0,
        }
    }

    pub fn add_task(&mut self, task: &'a dyn Task) -> Result<(), SchedulerError> {
        let id = task.id();
        if self.tasks.iter().any(|t| t.id() == id) {
            return Err(SchedulerError::Duplicate(id));
        }
        self.tasks.push(task).map_err(|_| SchedulerError::Full)?;
        self.order.clear();
        Ok(())
    }

    /// Resolve the execution order from the declared dependencies.
    pub fn resolve(&mut self) -> Result<(), SchedulerError> {
        for task in self.tasks.iter() {
            for &dependency in task.dependencies() {
                if !self.tasks.iter().any(|t| t.id() == dependency) {
                    return Err(SchedulerError::MissingDependency {
                        task: task.id(),
                        dependency,
                    });
                }
            }
        }

        let mut order: Vec<usize, MAX_TASKS> = Vec::new();
        while order.len() < self.tasks.len() {
            let next = self.tasks.iter().enumerate().position(|(i, task)| {
                !order.contains(&i)
                    && task
                        .dependencies()
                        .iter()
                        .all(|dep| order.iter().any(|&j| self.tasks[j].id() == *dep))
            });
            match next {
                // push cannot fail: order never outgrows tasks
                Some(i) => {
                    let _ = order.push(i);
                }
                None => {
                    let stuck = self
                        .tasks
                        .iter()
                        .enumerate()
                        .find(|(i, _)| !order.contains(i))
                        .map(|(_, t)| t.id())
                        .unwrap_or(TaskId::Messaging);
                    return Err(SchedulerError::DependencyCycle(stuck));
                }
            }
        }
        self.order = order;
        Ok(())
    }

    /// Task ids in execution order
    pub fn execution_order(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.order.iter().map(move |&i| self.tasks[i].id())
    }

    /// Initialize every task once. `report` runs before the initializing
    /// flag is cleared, so anything it writes to a transport is flushed
    /// before the main loop starts.
    pub fn initialize(
        &mut self,
        sys: &System,
        report: impl FnOnce(&StatusReport),
    ) -> Result<StatusReport, SchedulerError> {
        self.resolve()?;
        sys.update_flags(|f| f.initializing = true);

        for &i in self.order.iter() {
            let task = self.tasks[i];
            match task.initialize(sys) {
                Ok(()) => {
                    sys.set_task_ready(task.id());
                    log_info!("{} task ready", task.id().name());
                }
                Err(e) => {
                    log_error!("{} task failed to initialize: {:?}", task.id().name(), e);
                }
            }
        }

        let status = StatusReport::new(self.execution_order(), sys.application_flags());
        report(&status);

        sys.update_flags(|f| f.initializing = false);
        self.last_pass_ms = None;
        Ok(status)
    }

    /// One pass of the super loop
    pub fn run_pass<W: Feed, S: Sleep>(&mut self, sys: &System, watchdog: &mut W, power: &mut S) {
        watchdog.feed();
        self.check_time(sys);

        for &i in self.order.iter() {
            self.tasks[i].run_active_state(sys);
        }
        self.passes = self.passes.wrapping_add(1);

        sys.sleep_until_tick(power);
    }

    pub fn run<W: Feed, S: Sleep>(&mut self, sys: &System, watchdog: &mut W, power: &mut S) -> ! {
        loop {
            self.run_pass(sys, watchdog, power);
        }
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Passes that started later than one loop budget after the previous one
    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    fn check_time(&mut self, sys: &System) {
        let now = sys.now_ms();
        if let Some(last) = self.last_pass_ms {
            if is_time_up(last, now, LOOP_BUDGET_MS + 1) {
                if !sys.flags().time_violation {
                    log_warn!("loop overran its budget: {} ms", now.wrapping_sub(last));
                }
                self.overruns = self.overruns.wrapping_add(1);
                sys.update_flags(|f| f.time_violation = true);
            }
        }
        self.last_pass_ms = Some(now);
    }
}

impl Default for Scheduler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use core::cell::{Cell, RefCell};

    use super::*;
    use crate::hal::mock::{MockSleep, MockWatchdog};
    use crate::rtos::InitError;

    struct Probe<'l> {
        id: TaskId,
        deps: &'static [TaskId],
        fail: bool,
        busy_ms: Cell<u32>,
        log: &'l RefCell<std::vec::Vec<(char, TaskId)>>,
    }

    impl<'l> Probe<'l> {
        fn new(id: TaskId, deps: &'static [TaskId], log: &'l RefCell<std::vec::Vec<(char, TaskId)>>) -> Self {
            Self {
                id,
                deps,
                fail: false,
                busy_ms: Cell::new(0),
                log,
            }
        }
    }

    impl Task for Probe<'_> {
        fn id(&self) -> TaskId {
            self.id
        }

        fn dependencies(&self) -> &'static [TaskId] {
            self.deps
        }

        fn initialize(&self, _sys: &System) -> Result<(), InitError> {
            self.log.borrow_mut().push(('i', self.id));
            if self.fail {
                Err(InitError::HardwareFault)
            } else {
                Ok(())
            }
        }

        fn run_active_state(&self, sys: &System) {
            self.log.borrow_mut().push(('r', self.id));
            for _ in 0..self.busy_ms.get() {
                sys.tick();
            }
        }
    }

    #[test]
    fn dependencies_come_first_otherwise_registration_order() {
        let log = RefCell::new(std::vec::Vec::new());
        let app = Probe::new(TaskId::UserApp, &[TaskId::Button, TaskId::Debug], &log);
        let button = Probe::new(TaskId::Button, &[], &log);
        let debug = Probe::new(TaskId::Debug, &[TaskId::Uart], &log);
        let uart = Probe::new(TaskId::Uart, &[], &log);

        let mut scheduler = Scheduler::new();
        scheduler.add_task(&app).unwrap();
        scheduler.add_task(&button).unwrap();
        scheduler.add_task(&debug).unwrap();
        scheduler.add_task(&uart).unwrap();
        scheduler.resolve().unwrap();

        let order: std::vec::Vec<_> = scheduler.execution_order().collect();
        assert_eq!(order, [TaskId::Button, TaskId::Uart, TaskId::Debug, TaskId::UserApp]);
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let log = RefCell::new(std::vec::Vec::new());
        let debug = Probe::new(TaskId::Debug, &[TaskId::Uart], &log);
        let mut scheduler = Scheduler::new();
        scheduler.add_task(&debug).unwrap();
        assert_eq!(
            scheduler.resolve(),
            Err(SchedulerError::MissingDependency {
                task: TaskId::Debug,
                dependency: TaskId::Uart
            })
        );
    }

    #[test]
    fn cycles_are_rejected() {
        let log = RefCell::new(std::vec::Vec::new());
        let a = Probe::new(TaskId::Led, &[TaskId::Button], &log);
        let b = Probe::new(TaskId::Button, &[TaskId::Led], &log);
        let mut scheduler = Scheduler::new();
        scheduler.add_task(&a).unwrap();
        scheduler.add_task(&b).unwrap();
        assert_eq!(scheduler.resolve(), Err(SchedulerError::DependencyCycle(TaskId::Led)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let log = RefCell::new(std::vec::Vec::new());
        let a = Probe::new(TaskId::Led, &[], &log);
        let b = Probe::new(TaskId::Led, &[], &log);
        let mut scheduler = Scheduler::new();
        scheduler.add_task(&a).unwrap();
        assert_eq!(scheduler.add_task(&b), Err(SchedulerError::Duplicate(TaskId::Led)));
    }

    #[test]
    fn initialize_runs_once_each_and_reports_failures() {
        let log = RefCell::new(std::vec::Vec::new());
        let button = Probe::new(TaskId::Button, &[], &log);
        let mut led = Probe::new(TaskId::Led, &[], &log);
        led.fail = true;

        let sys = System::new();
        let mut scheduler = Scheduler::new();
        scheduler.add_task(&button).unwrap();
        scheduler.add_task(&led).unwrap();

        let mut initializing_during_report = false;
        let report = scheduler
            .initialize(&sys, |_| initializing_during_report = sys.is_initializing())
            .unwrap();

        assert!(initializing_during_report);
        assert!(!sys.is_initializing());
        assert_eq!(*log.borrow(), [('i', TaskId::Button), ('i', TaskId::Led)]);
        assert!(sys.application_flags().is_ready(TaskId::Button));
        assert!(!sys.application_flags().is_ready(TaskId::Led));
        assert_eq!(report.failed(), [TaskId::Led]);
    }

    #[test]
    fn each_pass_runs_every_task_once_in_order() {
        let log = RefCell::new(std::vec::Vec::new());
        let button = Probe::new(TaskId::Button, &[], &log);
        let app = Probe::new(TaskId::UserApp, &[TaskId::Button], &log);
        let sys = System::new();
        let mut scheduler = Scheduler::new();
        scheduler.add_task(&app).unwrap();
        scheduler.add_task(&button).unwrap();
        scheduler.initialize(&sys, |_| {}).unwrap();
        log.borrow_mut().clear();

        let mut watchdog = MockWatchdog::new();
        let mut power = MockSleep::new();
        scheduler.run_pass(&sys, &mut watchdog, &mut power);
        scheduler.run_pass(&sys, &mut watchdog, &mut power);

        assert_eq!(
            *log.borrow(),
            [
                ('r', TaskId::Button),
                ('r', TaskId::UserApp),
                ('r', TaskId::Button),
                ('r', TaskId::UserApp)
            ]
        );
        assert_eq!(watchdog.feeds(), 2);
        assert_eq!(sys.now_ms(), 2);
        assert_eq!(scheduler.passes(), 2);
    }

    #[test]
    fn overrunning_pass_sets_time_violation_without_stopping() {
        let log = RefCell::new(std::vec::Vec::new());
        let slow = Probe::new(TaskId::UserApp, &[], &log);
        let sys = System::new();
        let mut scheduler = Scheduler::new();
        scheduler.add_task(&slow).unwrap();
        scheduler.initialize(&sys, |_| {}).unwrap();

        let mut watchdog = MockWatchdog::new();
        let mut power = MockSleep::new();
        scheduler.run_pass(&sys, &mut watchdog, &mut power);
        scheduler.run_pass(&sys, &mut watchdog, &mut power);
        assert!(!sys.flags().time_violation);

        slow.busy_ms.set(3);
        scheduler.run_pass(&sys, &mut watchdog, &mut power);
        scheduler.run_pass(&sys, &mut watchdog, &mut power);
        assert!(sys.flags().time_violation);
        assert_eq!(scheduler.overruns(), 1);
        assert_eq!(scheduler.passes(), 4);
    }
}
