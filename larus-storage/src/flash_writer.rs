//! Flash write serializer
//!
//! All program and erase operations on the parameter pages go through one
//! [`FlashWriter`] task, fed by a bounded [`FlashWriteQueue`]. The writer
//! executes one order at a time: unlock, start, wait for the completion
//! interrupt, lock, verify. Any failure is fatal; the writer stops and the
//! queue reports [`FlashError::WriterFault`] to every later caller.
//!
//! ```text
//!  ParameterStore ──submit──► Channel (depth 3) ──► FlashWriter ──► FlashController
//!        ▲                                              │                 │
//!        └───────────── drain (progress signal) ◄───────┘   FLASH IRQ ────┘
//!                                                          (FlashCompletion)
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use larus_hal::{FlashCompletion, FlashController, FlashError, FlashMemory, Page};

use crate::logging::{log_debug, log_error, log_info};

/// Capacity of the write order queue
pub const FLASH_QUEUE_DEPTH: usize = 3;

/// One physical flash operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteOrder {
    /// Program one word at a region-relative word offset
    Program { offset: usize, value: u32 },
    /// Erase a whole page
    Erase(Page),
}

/// Bounded waits of the flash subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashTimeouts {
    /// Waiting for room in the queue
    pub submit: Duration,
    /// Waiting for the completion interrupt of one operation
    pub completion: Duration,
    /// Waiting for the queue to run empty (must cover an erase)
    pub drain: Duration,
}

impl FlashTimeouts {
    pub const DEFAULT: Self = Self {
        submit: Duration::from_millis(100),
        completion: Duration::from_millis(4000),
        drain: Duration::from_millis(5000),
    };
}

impl Default for FlashTimeouts {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Shared handle between the submitters and the flash writer
///
/// Const-constructible so the firmware can keep it in a `static`.
pub struct FlashWriteQueue {
    orders: Channel<CriticalSectionRawMutex, WriteOrder, FLASH_QUEUE_DEPTH>,
    /// Orders accepted into the queue
    submitted: AtomicU32,
    /// Orders executed and verified
    completed: AtomicU32,
    /// Set by the writer after every order and on fault
    progress: Signal<CriticalSectionRawMutex, ()>,
    faulted: AtomicBool,
    timeouts: FlashTimeouts,
}

impl FlashWriteQueue {
    /// Create a queue with default timeouts
    pub const fn new() -> Self {
        Self::with_timeouts(FlashTimeouts::DEFAULT)
    }

    /// Create a queue with custom timeouts
    pub const fn with_timeouts(timeouts: FlashTimeouts) -> Self {
        Self {
            orders: Channel::new(),
            submitted: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            progress: Signal::new(),
            faulted: AtomicBool::new(false),
            timeouts,
        }
    }

    /// Configured timeouts
    pub fn timeouts(&self) -> FlashTimeouts {
        self.timeouts
    }

    /// Check whether the writer stopped after a fatal error
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    fn check_alive(&self) -> Result<(), FlashError> {
        if self.is_faulted() {
            Err(FlashError::WriterFault)
        } else {
            Ok(())
        }
    }

    /// Enqueue an order without waiting
    ///
    /// Returns false if the queue is full or the writer has faulted.
    pub fn try_submit(&self, order: WriteOrder) -> bool {
        if self.is_faulted() {
            return false;
        }
        self.submitted.fetch_add(1, Ordering::AcqRel);
        if self.orders.try_send(order).is_err() {
            self.submitted.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Enqueue an order, waiting at most the submit timeout for room
    pub async fn submit(&self, order: WriteOrder) -> Result<(), FlashError> {
        self.check_alive()?;
        self.submitted.fetch_add(1, Ordering::AcqRel);
        if with_timeout(self.timeouts.submit, self.orders.send(order))
            .await
            .is_err()
        {
            self.submitted.fetch_sub(1, Ordering::AcqRel);
            log_error!("flash queue submit timed out: {:?}", order);
            return Err(FlashError::Timeout);
        }
        Ok(())
    }

    /// Wait until every submitted order has been executed
    pub async fn drain(&self) -> Result<(), FlashError> {
        let wait = async {
            loop {
                self.check_alive()?;
                if self.completed.load(Ordering::Acquire) == self.submitted.load(Ordering::Acquire)
                {
                    return Ok(());
                }
                self.progress.wait().await;
            }
        };
        match with_timeout(self.timeouts.drain, wait).await {
            Ok(result) => result,
            Err(_) => {
                log_error!("flash queue drain timed out");
                Err(FlashError::Timeout)
            }
        }
    }

    fn order_done(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
        self.progress.signal(());
    }

    fn mark_faulted(&self) {
        self.faulted.store(true, Ordering::Release);
        self.progress.signal(());
    }
}

impl Default for FlashWriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The single consumer of the write queue
///
/// Owns the flash controller; nothing else may program or erase.
pub struct FlashWriter<'a, C: FlashController, M: FlashMemory> {
    controller: C,
    memory: &'a M,
    queue: &'a FlashWriteQueue,
    completion: &'a FlashCompletion,
}

impl<'a, C: FlashController, M: FlashMemory> FlashWriter<'a, C, M> {
    pub fn new(
        controller: C,
        memory: &'a M,
        queue: &'a FlashWriteQueue,
        completion: &'a FlashCompletion,
    ) -> Self {
        Self {
            controller,
            memory,
            queue,
            completion,
        }
    }

    /// Writer task body
    ///
    /// Only returns on a fatal error, which is also latched into the queue.
    pub async fn run(&mut self) -> FlashError {
        log_info!("flash writer started");

        loop {
            let order = self.queue.orders.receive().await;
            match self.execute(order).await {
                Ok(()) => self.queue.order_done(),
                Err(error) => {
                    log_error!("flash writer fault on {:?}: {:?}", order, error);
                    self.queue.mark_faulted();
                    return error;
                }
            }
        }
    }

    async fn execute(&mut self, order: WriteOrder) -> Result<(), FlashError> {
        if let WriteOrder::Program { offset, .. } = order {
            self.memory.geometry().check(offset)?;
        }

        self.controller.unlock()?;
        self.completion.reset();

        let started = match order {
            WriteOrder::Program { offset, value } => self.controller.start_program(offset, value),
            WriteOrder::Erase(page) => self.controller.start_erase(page),
        };
        let status = match started {
            Ok(()) => with_timeout(self.queue.timeouts.completion, self.completion.wait())
                .await
                .unwrap_or(Err(FlashError::Timeout)),
            Err(error) => Err(error),
        };

        // Relock even if the operation failed
        let locked = self.controller.lock();
        status?;
        locked?;

        self.verify(order)
    }

    fn verify(&self, order: WriteOrder) -> Result<(), FlashError> {
        let ok = match order {
            WriteOrder::Program { offset, value } => self.memory.read_word(offset) == value,
            WriteOrder::Erase(page) => {
                log_debug!("page {:?} erased", page);
                self.memory.is_erased(page)
            }
        };
        if ok {
            Ok(())
        } else {
            Err(FlashError::VerifyFailed)
        }
    }
}

/// Erase `page` through the writer unless it already reads all ones
pub async fn erase_page<M: FlashMemory>(
    memory: &M,
    queue: &FlashWriteQueue,
    page: Page,
) -> Result<(), FlashError> {
    if memory.is_erased(page) {
        return Ok(());
    }
    queue.submit(WriteOrder::Erase(page)).await?;
    queue.drain().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{run_with_writer, SimFlash};
    use embassy_futures::block_on;
    use embassy_futures::select::{select, Either};
    use larus_hal::ERASED_WORD;

    const SHORT_TIMEOUTS: FlashTimeouts = FlashTimeouts {
        submit: Duration::from_millis(20),
        completion: Duration::from_millis(20),
        drain: Duration::from_millis(200),
    };

    /// Accepts every operation and never raises the completion
    struct SilentController;

    impl FlashController for SilentController {
        fn unlock(&mut self) -> Result<(), FlashError> {
            Ok(())
        }

        fn lock(&mut self) -> Result<(), FlashError> {
            Ok(())
        }

        fn start_program(&mut self, _offset: usize, _value: u32) -> Result<(), FlashError> {
            Ok(())
        }

        fn start_erase(&mut self, _page: Page) -> Result<(), FlashError> {
            Ok(())
        }
    }

    #[test]
    fn test_program_and_drain() {
        let flash = SimFlash::new(64);
        let queue = FlashWriteQueue::new();

        let result = run_with_writer(&flash, &queue, async {
            queue
                .submit(WriteOrder::Program { offset: 3, value: 0x1234_5678 })
                .await?;
            queue
                .submit(WriteOrder::Program { offset: 70, value: 0xCAFE_0000 })
                .await?;
            queue.drain().await
        });

        assert_eq!(result, Ok(Ok(())));
        assert_eq!(flash.word(3), 0x1234_5678);
        assert_eq!(flash.word(70), 0xCAFE_0000);
    }

    #[test]
    fn test_erase_skips_erased_page() {
        let flash = SimFlash::new(64);
        let queue = FlashWriteQueue::new();
        flash.poke(64 + 5, 0);

        let result = run_with_writer(&flash, &queue, async {
            erase_page(&flash, &queue, Page::A).await?;
            erase_page(&flash, &queue, Page::B).await
        });

        assert_eq!(result, Ok(Ok(())));
        assert_eq!(flash.erase_count(Page::A), 0);
        assert_eq!(flash.erase_count(Page::B), 1);
        assert!(flash.is_erased(Page::B));
    }

    #[test]
    fn test_verify_failure_is_fatal() {
        let flash = SimFlash::new(64);
        let queue = FlashWriteQueue::new();
        // Bits already cleared cannot be set again by programming
        flash.poke(10, 0x0000_0000);

        let result = run_with_writer(&flash, &queue, async {
            queue
                .submit(WriteOrder::Program { offset: 10, value: 0x0000_00FF })
                .await?;
            queue.drain().await
        });

        assert_eq!(result, Err(FlashError::VerifyFailed));
        assert!(queue.is_faulted());
        assert!(!queue.try_submit(WriteOrder::Erase(Page::A)));
    }

    #[test]
    fn test_out_of_bounds_order_is_fatal() {
        let flash = SimFlash::new(16);
        let queue = FlashWriteQueue::new();

        let result = run_with_writer(&flash, &queue, async {
            queue
                .submit(WriteOrder::Program { offset: 32, value: 0 })
                .await?;
            queue.drain().await
        });

        assert_eq!(result, Err(FlashError::OutOfBounds));
    }

    #[test]
    fn test_try_submit_reports_full_queue() {
        let queue = FlashWriteQueue::new();
        for offset in 0..FLASH_QUEUE_DEPTH {
            assert!(queue.try_submit(WriteOrder::Program { offset, value: 0 }));
        }
        assert!(!queue.try_submit(WriteOrder::Program { offset: 9, value: 0 }));
    }

    #[test]
    fn test_missing_completion_times_out() {
        let flash = SimFlash::new(64);
        let queue = FlashWriteQueue::with_timeouts(SHORT_TIMEOUTS);
        let completion = FlashCompletion::new();
        let mut writer = FlashWriter::new(SilentController, &flash, &queue, &completion);

        let producer = async {
            queue
                .submit(WriteOrder::Program { offset: 1, value: 0 })
                .await?;
            queue.drain().await
        };
        let outcome = block_on(select(producer, writer.run()));
        assert!(matches!(outcome, Either::Second(FlashError::Timeout)));
        assert!(queue.is_faulted());
        assert_eq!(flash.word(1), ERASED_WORD);
        assert_eq!(
            block_on(queue.submit(WriteOrder::Erase(Page::A))),
            Err(FlashError::WriterFault)
        );
    }

    #[test]
    fn test_submit_times_out_without_writer() {
        let queue = FlashWriteQueue::with_timeouts(SHORT_TIMEOUTS);
        for offset in 0..FLASH_QUEUE_DEPTH {
            assert!(queue.try_submit(WriteOrder::Program { offset, value: 0 }));
        }

        let order = WriteOrder::Program { offset: 9, value: 0 };
        assert_eq!(block_on(queue.submit(order)), Err(FlashError::Timeout));
        assert!(!queue.is_faulted());
        // The refused order is not counted as outstanding
        assert_eq!(
            queue.submitted.load(Ordering::Acquire),
            FLASH_QUEUE_DEPTH as u32
        );
    }

    #[test]
    fn test_drain_times_out_without_writer() {
        let queue = FlashWriteQueue::with_timeouts(SHORT_TIMEOUTS);
        block_on(queue.submit(WriteOrder::Erase(Page::B))).unwrap();
        assert_eq!(block_on(queue.drain()), Err(FlashError::Timeout));
    }
}
