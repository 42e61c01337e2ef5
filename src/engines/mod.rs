// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 引擎模块
///
/// 实现渲染边界的各个抓取引擎：
/// - http_engine：普通HTTP抓取
/// - splash_engine：委托外部渲染服务执行JS
/// - cache_engine：临时响应缓存装饰器
/// - router：按支持分数选择引擎并回退
pub mod cache_engine;
pub mod http_engine;
pub mod router;
pub mod splash_engine;
pub mod traits;
