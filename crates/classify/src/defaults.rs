//! Built-in category table for Chinese bank and payment-app statements.
//!
//! Priorities run from repayments (most specific, highest) down to generic
//! income, so that e.g. "还信用卡" is never filed as a transfer just because
//! the same screen also says "转出".

use crate::rules::ClassificationRule;

pub fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::new(
            "还款类",
            &["还款", "还贷", "还车贷", "还房贷", "还信用卡", "还花呗", "还借呗", "还白条", "小额贷款", "贷款"],
            &["还.*贷", "还.*款", "还.*呗", "还.*白条", "贷款"],
            120,
        ),
        ClassificationRule::new(
            "转账类",
            &["转账", "转给", "转入", "转出", "汇款", "打款", "微信转账", "支付宝转账"],
            &["转.*给", "转[入出]", "汇.*款", "转账"],
            110,
        ),
        ClassificationRule::new(
            "餐饮类",
            &["餐饮", "美食", "外卖", "餐厅", "饭店", "火锅", "烧烤", "奶茶", "咖啡", "零食", "米粒", "饿了么"],
            &["餐", "食", "外卖", "奶茶", "咖啡"],
            100,
        ),
        ClassificationRule::new(
            "购物类",
            &["购物", "淘宝", "京东", "天猫", "拼多多", "商场", "超市", "便利店", "服装", "鞋子"],
            &["淘宝|天猫", "京东", "拼多多", "商场|超市|便利店"],
            90,
        ),
        ClassificationRule::new(
            "交通类",
            &["交通", "打车", "公交", "地铁", "高铁", "飞机", "火车", "出租车", "滴滴", "共享单车", "加油"],
            &["打车|出租车|快车", "公交|地铁", "高铁|火车|12306", "机票|航空", "滴滴"],
            80,
        ),
        ClassificationRule::new(
            "娱乐类",
            &["娱乐", "电影", "游戏", "KTV", "酒吧", "网吧", "游乐园", "演唱会", "音乐会"],
            &["电影|影城", "游戏", "ktv", "酒吧|网吧"],
            70,
        ),
        ClassificationRule::new(
            "医疗类",
            &["医疗", "医院", "诊所", "药店", "药品", "检查", "治疗", "手术", "挂号"],
            &["医院|诊所", "药店|药房|药品", "挂号"],
            60,
        ),
        ClassificationRule::new(
            "教育类",
            &["教育", "学费", "培训", "课程", "学习", "考试", "报名费", "教材"],
            &["学费", "培训|课程", "考试|报名费"],
            50,
        ),
        ClassificationRule::new(
            "住房类",
            &["房租", "水电费", "物业费", "燃气费", "网费", "电话费", "宽带", "煤气费", "管道煤气费", "充值缴费"],
            &["房租|租金", "水费|电费|水电费", "物业费", "燃气费|煤气费", "话费|宽带|网费"],
            40,
        ),
        ClassificationRule::new(
            "投资理财类",
            &["投资", "理财", "基金", "股票", "债券", "保险", "存款", "利息", "保险费", "人身保险费", "平安人寿"],
            &["投资|理财", "基金|股票|债券", "保险", "人寿"],
            30,
        ),
        ClassificationRule::new(
            "工资收入类",
            &["工资", "薪水", "薪资", "奖金", "提成", "分红", "津贴"],
            &["工资|薪水|薪资", "奖金|提成"],
            20,
        ),
        ClassificationRule::new(
            "其他收入类",
            &["收入", "收款", "退款", "返现", "返利", "补贴", "报销", "提现", "微信零钱提现", "收到"],
            &["收入|收款", "退款", "返现|返利", "提现", "收到"],
            10,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn categories_are_unique() {
        let rules = default_rules();
        let names: HashSet<_> = rules.iter().map(|r| r.category.as_str()).collect();
        assert_eq!(names.len(), rules.len());
    }

    #[test]
    fn priorities_are_strictly_descending() {
        let rules = default_rules();
        assert!(rules.windows(2).all(|w| w[0].priority > w[1].priority));
    }
}
