// Bedtime window and unlock state engine
//
// Everything both execution contexts need to agree on lives here, compiled
// once into the library and linked into the foreground process and the
// background monitor alike.

pub mod bus;
pub mod clock;
pub mod engine;
pub mod ledger;
pub mod restrictor;
pub mod schedule;
pub mod scheduler;
pub mod shield;
pub mod status;
pub mod sunrise;
pub mod timezone;
pub mod window;

pub use bus::StateBus;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{BedtimeEngine, Evaluation};
pub use ledger::{UnlockLedger, UnlockRecord};
pub use restrictor::{CommandRestrictor, DryRunRestrictor, Restrictor, Selection, ShieldMode};
pub use schedule::{ScheduleConfig, ScheduleWarning, TimeOfDay};
pub use scheduler::{Scheduler, SchedulerHandle, Trigger, WeakSchedulerHandle};
pub use shield::{ExecutionContext, RestrictionState, ShieldController};
pub use status::{BedtimeStatus, Condition};
pub use sunrise::{SunriseProvider, TableSunriseProvider};
pub use timezone::{TimezoneChange, TimezoneReconciler};
pub use window::WindowEvaluator;
