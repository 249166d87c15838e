use crate::coords::Point;
use crate::device::HarmonyDevice;
use crate::error::fail_message;
use base64::{engine::general_purpose, Engine as _};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

pub const TOOL_NAMES: [&str; 13] = [
    "get_uilayout",
    "click",
    "long_click",
    "input_text",
    "swipe",
    "press_key",
    "list_app",
    "launch_app",
    "stop_app",
    "current_app",
    "screen_state",
    "wakeup",
    "get_screenshot",
];

const INSTRUCTIONS: &str = "Controls a HarmonyOS device through hdc. Call 'get_uilayout' to list \
the on-screen elements with their centers, then pass a 'Center: (x, y)' value to 'click', \
'long_click' or 'input_text'. Use 'list_app' and 'launch_app' to open apps, 'press_key' for \
home/back/media/volume keys and 'get_screenshot' when the layout is not enough. Failures are \
returned as text starting with [Fail].";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CenterArgs {
    /// Target coordinates such as "(277, 168)", usually copied from a get_uilayout Center line
    pub center: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InputTextArgs {
    /// Coordinates of the input field, e.g. "(540, 320)"
    pub center: String,
    /// Text to type; Enter is pressed afterwards
    pub text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SwipeArgs {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    /// Swipe speed in pixels per second (default 1000)
    pub speed: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PackageArgs {
    /// Bundle name, e.g. "com.huawei.hmos.browser"
    pub package_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct KeyArgs {
    /// One of home, back, enter, play_pause, stop, next, previous, volume_up, volume_down, power, mute
    pub key: String,
}

#[derive(Clone)]
pub struct HarmonyServer {
    device: HarmonyDevice,
    tool_router: ToolRouter<Self>,
}

impl HarmonyServer {
    pub fn new(device: HarmonyDevice) -> Self {
        Self {
            device,
            tool_router: Self::tool_router(),
        }
    }

    /// Device calls block on child processes; keep them off the runtime threads.
    async fn blocking<F>(&self, tool: &'static str, job: F) -> String
    where
        F: FnOnce(HarmonyDevice) -> String + Send + 'static,
    {
        info!(tool, "tool call");
        let device = self.device.clone();
        match tokio::task::spawn_blocking(move || job(device)).await {
            Ok(output) => output,
            Err(err) => fail_message(format!("{tool} did not complete: {err}")),
        }
    }
}

#[tool_router]
impl HarmonyServer {
    #[tool(
        description = "Get the elements on the current screen that carry text or a description, with their type, key, center coordinates and bounds."
    )]
    async fn get_uilayout(&self) -> String {
        self.blocking("get_uilayout", |device| device.get_ui_layout()).await
    }

    #[tool(description = "Click the given coordinate, written like \"(277, 168)\".")]
    async fn click(&self, Parameters(CenterArgs { center }): Parameters<CenterArgs>) -> String {
        self.blocking("click", move |device| device.click(&center)).await
    }

    #[tool(description = "Long click the given coordinate, written like \"(277, 168)\".")]
    async fn long_click(&self, Parameters(CenterArgs { center }): Parameters<CenterArgs>) -> String {
        self.blocking("long_click", move |device| device.long_click(&center)).await
    }

    #[tool(description = "Type text into the input field at the given coordinate and press Enter.")]
    async fn input_text(
        &self,
        Parameters(InputTextArgs { center, text }): Parameters<InputTextArgs>,
    ) -> String {
        self.blocking("input_text", move |device| device.input_text(&center, &text))
            .await
    }

    #[tool(description = "Swipe from (x1, y1) to (x2, y2).")]
    async fn swipe(&self, Parameters(args): Parameters<SwipeArgs>) -> String {
        let from = Point::new(args.x1.into(), args.y1.into());
        let to = Point::new(args.x2.into(), args.y2.into());
        self.blocking("swipe", move |device| device.swipe(from, to, args.speed))
            .await
    }

    #[tool(description = "Press a device key: home, back, enter, or a media/volume key.")]
    async fn press_key(&self, Parameters(KeyArgs { key }): Parameters<KeyArgs>) -> String {
        self.blocking("press_key", move |device| device.press_key(&key)).await
    }

    #[tool(description = "List the bundle names of all apps installed on the device.")]
    async fn list_app(&self) -> String {
        self.blocking("list_app", |device| device.list_app()).await
    }

    #[tool(description = "Launch an installed app by bundle name. Use list_app to see what is available.")]
    async fn launch_app(
        &self,
        Parameters(PackageArgs { package_name }): Parameters<PackageArgs>,
    ) -> String {
        self.blocking("launch_app", move |device| device.launch_app(&package_name))
            .await
    }

    #[tool(description = "Force stop an app by bundle name.")]
    async fn stop_app(
        &self,
        Parameters(PackageArgs { package_name }): Parameters<PackageArgs>,
    ) -> String {
        self.blocking("stop_app", move |device| device.stop_app(&package_name))
            .await
    }

    #[tool(description = "Get the bundle and ability of the foreground app.")]
    async fn current_app(&self) -> String {
        self.blocking("current_app", |device| device.current_app()).await
    }

    #[tool(description = "Get the screen power state (AWAKE, INACTIVE or SLEEP).")]
    async fn screen_state(&self) -> String {
        self.blocking("screen_state", |device| device.screen_state()).await
    }

    #[tool(description = "Wake the device screen up.")]
    async fn wakeup(&self) -> String {
        self.blocking("wakeup", |device| device.wakeup()).await
    }

    #[tool(description = "Take a downscaled screenshot of the device screen.")]
    async fn get_screenshot(&self) -> Result<CallToolResult, McpError> {
        info!(tool = "get_screenshot", "tool call");
        let device = self.device.clone();
        let content = match tokio::task::spawn_blocking(move || device.screenshot_png()).await {
            Ok(Ok(png)) => Content::image(general_purpose::STANDARD.encode(png), "image/png".to_string()),
            Ok(Err(err)) => Content::text(fail_message(err)),
            Err(err) => Content::text(fail_message(format!("get_screenshot did not complete: {err}"))),
        };
        Ok(CallToolResult::success(vec![content]))
    }
}

#[tool_handler]
impl ServerHandler for HarmonyServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }
}
