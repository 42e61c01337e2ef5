// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 包含一次采集运行的编排逻辑：
/// - 运行状态（run_state）：共享计数器、全局上限和故障上报
/// - 运行控制器（run_controller）：装配、播种、生命周期与清理
pub mod run_controller;
pub mod run_state;
