//! Controller factories.
//!
//! Each driver crate exposes one [`ControllerFactory`] per device family. The
//! shared controller registry is generic over a factory: it calls
//! [`ControllerFactory::build`] the first time a port is registered and then
//! hands the same controller to every client of that port.
//!
//! ```text
//! Bench (urashg-hardware)
//!   SharedControllerRegistry<Ell14Factory>      port -> Arc<Ell14Bus>
//!   SharedControllerRegistry<MaiTaiFactory>     port -> Arc<MaiTai>
//!   SharedControllerRegistry<Newport1830CFactory>
//!   SharedControllerRegistry<Esp300Factory>
//! ```

use crate::descriptor::ConnectionDescriptor;
use crate::error::AppResult;
use crate::family::DeviceFamily;
use crate::protocol::DeviceProtocol;
use crate::transport::TransportFactory;
use std::sync::Arc;

/// Builds disconnected controllers for one device family.
pub trait ControllerFactory: Send + Sync {
    /// Controller type produced by this factory.
    type Controller: DeviceProtocol + 'static;

    /// Family handled by this factory.
    fn family(&self) -> DeviceFamily;

    /// Human-readable driver name.
    fn name(&self) -> &'static str;

    /// Check a descriptor before building. The default accepts any non-zero baud.
    fn validate(&self, descriptor: &ConnectionDescriptor) -> AppResult<()> {
        if descriptor.baud_rate == 0 {
            return Err(crate::error::DaqError::validation(
                "baud_rate",
                descriptor.baud_rate,
                "must be non-zero",
            ));
        }
        Ok(())
    }

    /// Build a controller for `descriptor` that opens transports via `backend`.
    ///
    /// The returned controller is disconnected.
    fn build(
        &self,
        descriptor: &ConnectionDescriptor,
        backend: Arc<dyn TransportFactory>,
    ) -> AppResult<Self::Controller>;
}
