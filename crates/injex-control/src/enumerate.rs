//! Device and process enumeration operations.

use injex_core::traits::{ApplicationInfo, DeviceInfo};

use crate::{
    controller::{ControlError, SessionController},
    responses::ProcessList,
};

impl SessionController {
    /// List devices reachable through the target runtime.
    ///
    /// # Errors
    /// Runtime failures propagate.
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, ControlError> {
        Ok(self.runtime.enumerate_devices().await?)
    }

    /// List processes on a device, optionally filtered by case-insensitive
    /// substring match on the name.
    ///
    /// # Errors
    /// Runtime failures propagate.
    pub async fn list_processes(
        &self,
        name: Option<&str>,
        device_id: Option<&str>,
    ) -> Result<ProcessList, ControlError> {
        let device = self.runtime.resolve_device(device_id).await?;
        let mut processes = device.enumerate_processes().await?;
        if let Some(name) = name {
            let needle = name.to_lowercase();
            processes.retain(|p| p.name.to_lowercase().contains(&needle));
        }
        Ok(ProcessList {
            count: processes.len(),
            processes,
        })
    }

    /// List installed applications on a device. `pid` is 0 for applications
    /// that are not running.
    ///
    /// # Errors
    /// Runtime failures propagate.
    pub async fn list_applications(
        &self,
        device_id: Option<&str>,
    ) -> Result<Vec<ApplicationInfo>, ControlError> {
        let device = self.runtime.resolve_device(device_id).await?;
        Ok(device.enumerate_applications().await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use injex_core::{
        testing::MockRuntime,
        traits::{ApplicationInfo, ProcessInfo, TargetRuntime},
    };

    use crate::controller::SessionController;

    fn controller() -> (Arc<MockRuntime>, SessionController) {
        let runtime = Arc::new(MockRuntime::new());
        let controller = SessionController::new(Arc::clone(&runtime) as Arc<dyn TargetRuntime>);
        (runtime, controller)
    }

    #[tokio::test]
    async fn test_list_devices() {
        let (_, c) = controller();
        let devices = c.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "mock-usb");
    }

    #[tokio::test]
    async fn test_list_processes_filters_by_substring() {
        let (runtime, c) = controller();
        runtime.device().set_processes(vec![
            ProcessInfo { pid: 1, name: "launchd".to_owned() },
            ProcessInfo { pid: 77, name: "Safari".to_owned() },
            ProcessInfo { pid: 78, name: "SafariBookmarks".to_owned() },
        ]);

        let all = c.list_processes(None, None).await.unwrap();
        assert_eq!(all.count, 3);

        let filtered = c.list_processes(Some("safari"), None).await.unwrap();
        assert_eq!(filtered.count, 2);
        assert!(filtered.processes.iter().all(|p| p.name.contains("Safari")));
    }

    #[tokio::test]
    async fn test_list_applications() {
        let (runtime, c) = controller();
        runtime.device().set_applications(vec![ApplicationInfo {
            identifier: "com.example.app".to_owned(),
            name: "Example".to_owned(),
            pid: 0,
        }]);

        let apps = c.list_applications(None).await.unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].identifier, "com.example.app");
        assert_eq!(apps[0].pid, 0);
    }

    #[tokio::test]
    async fn test_unknown_device_propagates() {
        let (_, c) = controller();
        assert!(c.list_processes(None, Some("ghost")).await.is_err());
    }
}
